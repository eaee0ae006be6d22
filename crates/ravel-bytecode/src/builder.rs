//! Fluent builders for compiled units

use crate::descriptor::MethodDescriptor;
use crate::instr::{Constant, Instr, Label};
use crate::module::{access, ClassUnit, FieldDef, MethodDef, TryCatchBlock};
use crate::names;
use crate::opcode::Opcode;

/// Helper for building a [`ClassUnit`]
pub struct ClassBuilder {
    unit: ClassUnit,
}

impl ClassBuilder {
    /// Start a public class extending `sys/Object`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            unit: ClassUnit::new(name, Some(names::OBJECT.to_string())),
        }
    }

    /// Set the direct ancestor
    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.unit.super_name = Some(super_name.into());
        self
    }

    /// Set access flags
    pub fn access(mut self, flags: u16) -> Self {
        self.unit.access = flags;
        self
    }

    /// Add an implemented interface
    pub fn implements(mut self, iface: impl Into<String>) -> Self {
        self.unit.interfaces.push(iface.into());
        self
    }

    /// Add a marker attribute
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.unit.markers.push(marker.into());
        self
    }

    /// Set the source file name
    pub fn source_file(mut self, file: impl Into<String>) -> Self {
        self.unit.source_file = Some(file.into());
        self
    }

    /// Add an instance field
    pub fn field(mut self, name: impl Into<String>, desc: impl Into<String>) -> Self {
        self.unit.fields.push(FieldDef {
            name: name.into(),
            desc: desc.into(),
            access: access::PRIVATE,
        });
        self
    }

    /// Add a static field
    pub fn static_field(mut self, name: impl Into<String>, desc: impl Into<String>) -> Self {
        self.unit.fields.push(FieldDef {
            name: name.into(),
            desc: desc.into(),
            access: access::PUBLIC | access::STATIC,
        });
        self
    }

    /// Add a method whose body is written by `body`
    pub fn method<F>(mut self, name: &str, desc: &str, flags: u16, body: F) -> Self
    where
        F: FnOnce(&mut MethodBuilder),
    {
        let mut mb = MethodBuilder::new(name, desc, flags);
        body(&mut mb);
        self.unit.methods.push(mb.build());
        self
    }

    /// Add an already built method
    pub fn add_method(mut self, method: MethodDef) -> Self {
        self.unit.methods.push(method);
        self
    }

    /// Add a no-argument constructor that calls the ancestor's constructor
    pub fn default_constructor(self) -> Self {
        let parent = self
            .unit
            .super_name
            .clone()
            .unwrap_or_else(|| names::OBJECT.to_string());
        self.method(names::CONSTRUCTOR, "()V", access::PUBLIC, |m| {
            m.aload(0)
                .invoke_special(&parent, names::CONSTRUCTOR, "()V")
                .ret();
        })
    }

    /// Finish the unit
    pub fn build(self) -> ClassUnit {
        self.unit
    }
}

/// Helper for building a method body
///
/// `max_locals` is computed from the descriptor and the highest local index
/// used; [`MethodBuilder::locals`] can raise it further.
pub struct MethodBuilder {
    name: String,
    desc: String,
    access: u16,
    throws: Vec<String>,
    code: Vec<Instr>,
    handlers: Vec<TryCatchBlock>,
    next_label: u32,
    min_locals: u16,
}

impl MethodBuilder {
    /// Start a method
    pub fn new(name: &str, desc: &str, access: u16) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            access,
            throws: Vec::new(),
            code: Vec::new(),
            handlers: Vec::new(),
            next_label: 0,
            min_locals: 0,
        }
    }

    /// Declare an exception type
    pub fn throws(&mut self, ty: &str) -> &mut Self {
        self.throws.push(ty.to_string());
        self
    }

    /// Declare the suspension signal, making the method suspendable
    pub fn suspendable(&mut self) -> &mut Self {
        self.throws(names::SUSPEND_EXECUTION)
    }

    /// Require at least `count` local slots
    pub fn locals(&mut self, count: u16) -> &mut Self {
        self.min_locals = self.min_locals.max(count);
        self
    }

    /// Allocate a fresh label
    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Place a label at the current position
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.emit(Instr::Label(label))
    }

    /// Emit any instruction
    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        self.code.push(instr);
        self
    }

    /// Emit an operand-less instruction
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.emit(Instr::Simple(op))
    }

    /// Register an exception handler
    pub fn try_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.handlers.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    // ===== Constants =====

    /// Push an int
    pub fn iconst(&mut self, v: i32) -> &mut Self {
        self.emit(Instr::Const(Constant::Int(v)))
    }

    /// Push a long
    pub fn lconst(&mut self, v: i64) -> &mut Self {
        self.emit(Instr::Const(Constant::Long(v)))
    }

    /// Push a float
    pub fn fconst(&mut self, v: f32) -> &mut Self {
        self.emit(Instr::Const(Constant::Float(v)))
    }

    /// Push a double
    pub fn dconst(&mut self, v: f64) -> &mut Self {
        self.emit(Instr::Const(Constant::Double(v)))
    }

    /// Push a string
    pub fn sconst(&mut self, v: &str) -> &mut Self {
        self.emit(Instr::Const(Constant::Str(v.to_string())))
    }

    /// Push null
    pub fn aconst_null(&mut self) -> &mut Self {
        self.op(Opcode::AConstNull)
    }

    // ===== Locals =====

    /// Load an int local
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::ILoad, index))
    }

    /// Load a long local
    pub fn lload(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::LLoad, index))
    }

    /// Load a float local
    pub fn fload(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::FLoad, index))
    }

    /// Load a double local
    pub fn dload(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::DLoad, index))
    }

    /// Load a reference local
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::ALoad, index))
    }

    /// Store an int local
    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::IStore, index))
    }

    /// Store a long local
    pub fn lstore(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::LStore, index))
    }

    /// Store a float local
    pub fn fstore(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::FStore, index))
    }

    /// Store a double local
    pub fn dstore(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::DStore, index))
    }

    /// Store a reference local
    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::var(Opcode::AStore, index))
    }

    /// Increment an int local
    pub fn iinc(&mut self, index: u16, delta: i32) -> &mut Self {
        self.emit(Instr::Inc { index, delta })
    }

    // ===== Control Flow =====

    /// Emit a jump
    pub fn jump(&mut self, op: Opcode, target: Label) -> &mut Self {
        self.emit(Instr::Jump { op, target })
    }

    /// Unconditional jump
    pub fn goto(&mut self, target: Label) -> &mut Self {
        self.jump(Opcode::Goto, target)
    }

    /// Dense switch
    pub fn table_switch(&mut self, low: i32, default: Label, targets: Vec<Label>) -> &mut Self {
        self.emit(Instr::Switch {
            low,
            default,
            targets,
        })
    }

    /// Return void
    pub fn ret(&mut self) -> &mut Self {
        self.op(Opcode::Return)
    }

    /// Return an int
    pub fn ireturn(&mut self) -> &mut Self {
        self.op(Opcode::IReturn)
    }

    /// Return a reference
    pub fn areturn(&mut self) -> &mut Self {
        self.op(Opcode::AReturn)
    }

    /// Throw the exception on top of the stack
    pub fn athrow(&mut self) -> &mut Self {
        self.op(Opcode::AThrow)
    }

    // ===== Fields & Calls =====

    fn field(&mut self, op: Opcode, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Instr::Field {
            op,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }

    /// Read an instance field
    pub fn get_field(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.field(Opcode::GetField, owner, name, desc)
    }

    /// Write an instance field
    pub fn put_field(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.field(Opcode::PutField, owner, name, desc)
    }

    /// Read a static field
    pub fn get_static(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.field(Opcode::GetStatic, owner, name, desc)
    }

    /// Write a static field
    pub fn put_static(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.field(Opcode::PutStatic, owner, name, desc)
    }

    /// Virtual call
    pub fn invoke_virtual(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Instr::invoke(Opcode::InvokeVirtual, owner, name, desc))
    }

    /// Non-virtual call
    pub fn invoke_special(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Instr::invoke(Opcode::InvokeSpecial, owner, name, desc))
    }

    /// Static call
    pub fn invoke_static(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Instr::invoke(Opcode::InvokeStatic, owner, name, desc))
    }

    /// Interface call
    pub fn invoke_interface(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Instr::invoke(Opcode::InvokeInterface, owner, name, desc))
    }

    /// Call the suspend primitive
    pub fn yield_now(&mut self) -> &mut Self {
        self.invoke_static(names::COROUTINE, names::YIELD_NAME, names::YIELD_DESC)
    }

    // ===== Objects =====

    fn type_op(&mut self, op: Opcode, desc: &str) -> &mut Self {
        self.emit(Instr::Type {
            op,
            desc: desc.to_string(),
        })
    }

    /// Allocate an instance
    pub fn new_object(&mut self, ty: &str) -> &mut Self {
        self.type_op(Opcode::New, ty)
    }

    /// Checked cast
    pub fn checkcast(&mut self, ty: &str) -> &mut Self {
        self.type_op(Opcode::CheckCast, ty)
    }

    /// Type test
    pub fn instance_of(&mut self, ty: &str) -> &mut Self {
        self.type_op(Opcode::InstanceOf, ty)
    }

    /// Allocate an array of the given element descriptor
    pub fn new_array(&mut self, elem: &str) -> &mut Self {
        self.type_op(Opcode::NewArray, elem)
    }

    /// Finish the method
    pub fn build(self) -> MethodDef {
        let params = MethodDescriptor::parse(&self.desc)
            .map(|d| d.argument_count())
            .unwrap_or(0);
        let receiver = usize::from(self.access & access::STATIC == 0);
        let used = self
            .code
            .iter()
            .filter_map(|i| match i {
                Instr::Var { index, .. } | Instr::Inc { index, .. } => Some(*index as usize + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let max_locals = (params + receiver).max(used).max(self.min_locals as usize);

        MethodDef {
            name: self.name,
            desc: self.desc,
            access: self.access,
            throws: self.throws,
            max_locals: max_locals.min(u16::MAX as usize) as u16,
            code: self.code,
            handlers: self.handlers,
        }
    }
}
