//! Interpreter for compiled units
//!
//! The [`Vm`] holds loaded classes, host-implemented natives and static
//! fields. It executes original and instrumented bodies alike; frame opcodes
//! operate on the active coroutine's [`Stack`](crate::Stack).

mod interpreter;
mod natives;
mod proto;

pub use proto::MethodProto;

use crate::object::Object;
use crate::value::Value;
use crate::{VmError, VmResult};
use ravel_bytecode::{names, verify_unit, ClassUnit, Label, MethodDef, Opcode};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, trace};

/// Maximum nesting of interpreted calls
const MAX_CALL_DEPTH: usize = 512;

/// Host implementation of a method
///
/// Receives the arguments (receiver first for instance methods) and returns
/// the result, `None` for void methods.
pub type NativeFn = Rc<dyn Fn(&Vm, &[Value]) -> VmResult<Option<Value>>>;

type MethodKey = (String, String, String);

/// Handler table entry with labels resolved to instruction indices
#[derive(Debug, Clone)]
pub(crate) struct ResolvedHandler {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub catch_type: Option<String>,
}

/// A method ready for execution
pub(crate) struct LoadedMethod {
    pub owner: String,
    pub def: MethodDef,
    pub labels: FxHashMap<Label, usize>,
    pub handlers: Vec<ResolvedHandler>,
}

impl LoadedMethod {
    fn new(owner: &str, def: MethodDef) -> Self {
        let labels: FxHashMap<Label, usize> = def
            .code
            .iter()
            .enumerate()
            .filter_map(|(i, instr)| match instr {
                ravel_bytecode::Instr::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();
        // verified units have every handler label defined
        let handlers = def
            .handlers
            .iter()
            .filter_map(|h| {
                Some(ResolvedHandler {
                    start: *labels.get(&h.start)?,
                    end: *labels.get(&h.end)?,
                    handler: *labels.get(&h.handler)?,
                    catch_type: h.catch_type.clone(),
                })
            })
            .collect();
        Self {
            owner: owner.to_string(),
            def,
            labels,
            handlers,
        }
    }

    pub fn label(&self, label: Label) -> VmResult<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| VmError::RuntimeError(format!("undefined label {}", label)))
    }
}

/// A loaded class
pub(crate) struct LoadedClass {
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub methods: FxHashMap<(String, String), Rc<LoadedMethod>>,
}

enum Callable {
    Native(NativeFn),
    Bytecode(Rc<LoadedMethod>),
}

/// The interpreter
pub struct Vm {
    classes: RefCell<FxHashMap<String, Rc<LoadedClass>>>,
    natives: RefCell<FxHashMap<MethodKey, NativeFn>>,
    statics: RefCell<FxHashMap<(String, String), Value>>,
    call_depth: Cell<usize>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with the built-in platform classes and natives
    pub fn new() -> Self {
        let vm = Self {
            classes: RefCell::new(FxHashMap::default()),
            natives: RefCell::new(FxHashMap::default()),
            statics: RefCell::new(FxHashMap::default()),
            call_depth: Cell::new(0),
        };
        natives::install(&vm);
        vm
    }

    // ===== Registration =====

    /// Verify and register a unit, replacing any class of the same name
    pub fn load(&self, unit: ClassUnit) -> VmResult<()> {
        verify_unit(&unit).map_err(|e| VmError::Verify(format!("{}: {}", unit.name, e)))?;
        self.register(unit);
        Ok(())
    }

    fn register(&self, unit: ClassUnit) {
        let name = unit.name.clone();
        let methods = unit
            .methods
            .into_iter()
            .map(|m| {
                let key = (m.name.clone(), m.desc.clone());
                (key, Rc::new(LoadedMethod::new(&name, m)))
            })
            .collect::<FxHashMap<_, _>>();
        debug!(class = %name, methods = methods.len(), "loaded class");
        let class = LoadedClass {
            super_name: unit.super_name,
            interfaces: unit.interfaces,
            methods,
        };
        if self
            .classes
            .borrow_mut()
            .insert(name.clone(), Rc::new(class))
            .is_some()
        {
            trace!(class = %name, "replaced existing class");
        }
    }

    /// Bind a host closure to `(owner, name, desc)`
    pub fn register_native<F>(&self, owner: &str, name: &str, desc: &str, f: F)
    where
        F: Fn(&Vm, &[Value]) -> VmResult<Option<Value>> + 'static,
    {
        self.natives.borrow_mut().insert(
            (owner.to_string(), name.to_string(), desc.to_string()),
            Rc::new(f),
        );
    }

    /// Whether a class is loaded
    pub fn has_class(&self, name: &str) -> bool {
        self.classes.borrow().contains_key(name)
    }

    fn class(&self, name: &str) -> Option<Rc<LoadedClass>> {
        self.classes.borrow().get(name).cloned()
    }

    // ===== Type Queries =====

    /// Whether `class` is `ty` or one of its descendants or implementors
    pub fn is_subclass(&self, class: &str, ty: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == ty {
                return true;
            }
            let Some(loaded) = self.class(&name) else {
                return false;
            };
            if loaded.interfaces.iter().any(|i| self.is_subclass(i, ty)) {
                return true;
            }
            current = loaded.super_name.clone();
        }
        false
    }

    /// Whether `value` is a non-null instance of `ty`
    pub fn is_instance_of(&self, value: &Value, ty: &str) -> bool {
        match value {
            Value::Str(_) => ty == names::STRING || ty == names::OBJECT,
            Value::Array(_) => ty == names::OBJECT || ty.starts_with('['),
            Value::Object(obj) => self.is_subclass(obj.class(), ty),
            _ => false,
        }
    }

    // ===== Statics =====

    /// Read a static field
    pub fn get_static(&self, owner: &str, name: &str) -> Option<Value> {
        self.statics
            .borrow()
            .get(&(owner.to_string(), name.to_string()))
            .cloned()
    }

    /// Write a static field
    pub fn set_static(&self, owner: &str, name: &str, value: Value) {
        self.statics
            .borrow_mut()
            .insert((owner.to_string(), name.to_string()), value);
    }

    // ===== Invocation =====

    fn resolve(&self, start: &str, name: &str, desc: &str) -> VmResult<Callable> {
        let mut current = Some(start.to_string());
        while let Some(class_name) = current {
            let key = (class_name.clone(), name.to_string(), desc.to_string());
            if let Some(native) = self.natives.borrow().get(&key) {
                return Ok(Callable::Native(Rc::clone(native)));
            }
            let Some(class) = self.class(&class_name) else {
                break;
            };
            if let Some(method) = class.methods.get(&(name.to_string(), desc.to_string())) {
                if !method.def.is_abstract_or_native() {
                    return Ok(Callable::Bytecode(Rc::clone(method)));
                }
            }
            current = class.super_name.clone();
        }
        Err(VmError::NoSuchMethod(format!("{}.{}{}", start, name, desc)))
    }

    /// Invoke a method the way the given invoke opcode would
    ///
    /// `args` holds the receiver first for instance calls.
    pub fn invoke(
        &self,
        op: Opcode,
        owner: &str,
        name: &str,
        desc: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let callable = match op {
            Opcode::InvokeStatic | Opcode::InvokeSpecial => self.resolve(owner, name, desc)?,
            Opcode::InvokeVirtual | Opcode::InvokeInterface => {
                let receiver = args.first().ok_or(VmError::StackUnderflow)?;
                let class = receiver.class_name().ok_or(match receiver {
                    Value::Null => VmError::NullPointer,
                    other => VmError::TypeError(format!(
                        "cannot invoke {} on {}",
                        name,
                        other.type_name()
                    )),
                })?;
                let class = class.to_string();
                self.resolve(&class, name, desc)?
            }
            other => {
                return Err(VmError::RuntimeError(format!(
                    "{} is not an invoke opcode",
                    other
                )))
            }
        };
        if matches!(op, Opcode::InvokeSpecial) && args.first().is_some_and(Value::is_null) {
            return Err(VmError::NullPointer);
        }

        match callable {
            Callable::Native(f) => f(self, &args),
            Callable::Bytecode(method) => self.execute(&method, args),
        }
    }

    /// Invoke a static method
    pub fn invoke_static(
        &self,
        owner: &str,
        name: &str,
        desc: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        self.invoke(Opcode::InvokeStatic, owner, name, desc, args)
    }

    /// Invoke an instance method with virtual dispatch on `receiver`
    pub fn invoke_virtual(
        &self,
        receiver: Value,
        name: &str,
        desc: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let owner = receiver
            .class_name()
            .ok_or(VmError::NullPointer)?
            .to_string();
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(receiver);
        full.extend(args);
        self.invoke(Opcode::InvokeVirtual, &owner, name, desc, full)
    }

    /// Allocate an instance of `class` and run its constructor
    pub fn new_instance(&self, class: &str, ctor_desc: &str, args: Vec<Value>) -> VmResult<Value> {
        if !self.has_class(class) {
            return Err(VmError::NoSuchClass(class.to_string()));
        }
        let obj = Value::object(Object::new(class));
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(obj.clone());
        full.extend(args);
        self.invoke(Opcode::InvokeSpecial, class, names::CONSTRUCTOR, ctor_desc, full)?;
        Ok(obj)
    }

    /// Create an exception object with a message, without running bytecode
    pub fn new_exception(&self, class: &str, message: &str) -> Value {
        let obj = Object::new(class);
        obj.set_field("message", Value::string(message));
        Value::object(obj)
    }

    /// Create an exception and wrap it as a thrown error
    pub fn throw(&self, class: &str, message: &str) -> VmError {
        VmError::Thrown(self.new_exception(class, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravel_bytecode::{access, ClassBuilder};

    #[test]
    fn test_builtin_hierarchy() {
        let vm = Vm::new();
        assert!(vm.has_class(names::OBJECT));
        assert!(vm.is_subclass(names::ILLEGAL_STATE_EXCEPTION, names::THROWABLE));
        assert!(vm.is_subclass(names::SUSPEND_EXECUTION, names::EXCEPTION));
        assert!(!vm.is_subclass(names::ERROR, names::EXCEPTION));
    }

    #[test]
    fn test_static_invoke() {
        let vm = Vm::new();
        vm.load(
            ClassBuilder::new("app/Math")
                .method("twice", "(I)I", access::STATIC, |m| {
                    m.iload(0).iconst(2).op(Opcode::IMul).ireturn();
                })
                .build(),
        )
        .unwrap();
        let result = vm
            .invoke_static("app/Math", "twice", "(I)I", vec![Value::Int(21)])
            .unwrap();
        assert_eq!(result, Some(Value::Int(42)));
    }

    #[test]
    fn test_virtual_dispatch_walks_ancestors() {
        let vm = Vm::new();
        vm.load(
            ClassBuilder::new("app/Base")
                .default_constructor()
                .method("name", "()Lsys/String;", access::PUBLIC, |m| {
                    m.sconst("base").areturn();
                })
                .method("id", "()I", access::PUBLIC, |m| {
                    m.iconst(1).ireturn();
                })
                .build(),
        )
        .unwrap();
        vm.load(
            ClassBuilder::new("app/Derived")
                .extends("app/Base")
                .default_constructor()
                .method("name", "()Lsys/String;", access::PUBLIC, |m| {
                    m.sconst("derived").areturn();
                })
                .build(),
        )
        .unwrap();

        let obj = vm.new_instance("app/Derived", "()V", vec![]).unwrap();
        let name = vm
            .invoke_virtual(obj.clone(), "name", "()Lsys/String;", vec![])
            .unwrap();
        assert_eq!(name, Some(Value::string("derived")));
        let id = vm.invoke_virtual(obj, "id", "()I", vec![]).unwrap();
        assert_eq!(id, Some(Value::Int(1)));
    }

    #[test]
    fn test_natives_win() {
        let vm = Vm::new();
        vm.register_native("app/Host", "answer", "()I", |_, _| Ok(Some(Value::Int(7))));
        assert_eq!(
            vm.invoke_static("app/Host", "answer", "()I", vec![]).unwrap(),
            Some(Value::Int(7))
        );
    }

    #[test]
    fn test_missing_method() {
        let vm = Vm::new();
        assert!(matches!(
            vm.invoke_static("app/Nope", "run", "()V", vec![]),
            Err(VmError::NoSuchMethod(_))
        ));
        assert!(matches!(
            vm.new_instance("app/Nope", "()V", vec![]),
            Err(VmError::NoSuchClass(_))
        ));
    }

    #[test]
    fn test_load_rejects_invalid_unit() {
        let vm = Vm::new();
        let unit = ClassBuilder::new("app/Bad")
            .method("run", "()V", access::STATIC, |m| {
                m.iconst(1);
            })
            .build();
        assert!(matches!(vm.load(unit), Err(VmError::Verify(_))));
    }

    #[test]
    fn test_instance_checks() {
        let vm = Vm::new();
        let exc = vm.new_exception(names::ILLEGAL_STATE_EXCEPTION, "bad");
        assert!(vm.is_instance_of(&exc, names::RUNTIME_EXCEPTION));
        assert!(vm.is_instance_of(&Value::string("s"), names::OBJECT));
        assert!(!vm.is_instance_of(&Value::Null, names::OBJECT));
        assert!(!vm.is_instance_of(&Value::Int(1), names::OBJECT));
    }
}
