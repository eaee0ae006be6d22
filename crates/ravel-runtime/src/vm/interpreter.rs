//! Instruction execution
//!
//! One call to [`Vm::execute`] runs one method activation to completion.
//! Exceptions raised inside the activation are matched against its handler
//! table in order. Runtime faults (division by zero, null dereference, bad
//! casts and array indices) are raised as platform exceptions and unwind the
//! same way; anything else propagates to the caller unchanged.

use super::{LoadedMethod, Vm, MAX_CALL_DEPTH};
use crate::coroutine::with_active_stack;
use crate::object::Object;
use crate::suspend;
use crate::value::Value;
use crate::{VmError, VmResult};
use ravel_bytecode::{names, Constant, FrameOp, Instr, MethodDescriptor, Opcode};
use std::cmp::Ordering;
use tracing::trace;

/// Result of executing one instruction
enum Flow {
    Continue,
    Return(Option<Value>),
}

/// Activation state of one method
struct Frame {
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
}

impl Frame {
    fn new(method: &LoadedMethod, args: Vec<Value>) -> VmResult<Self> {
        let max = method.def.max_locals as usize;
        if args.len() > max {
            return Err(VmError::IllegalArgument(format!(
                "{}.{}{} takes {} local slots but got {} arguments",
                method.owner,
                method.def.name,
                method.def.desc,
                max,
                args.len()
            )));
        }
        let mut locals = args;
        locals.resize(max, Value::Null);
        Ok(Self {
            locals,
            stack: Vec::with_capacity(8),
            pc: 0,
        })
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or(VmError::StackUnderflow)
    }

    fn pop_int(&mut self) -> VmResult<i32> {
        self.pop()?
            .as_i32()
            .ok_or_else(|| VmError::TypeError("Expected int".to_string()))
    }

    fn pop_long(&mut self) -> VmResult<i64> {
        self.pop()?
            .as_i64()
            .ok_or_else(|| VmError::TypeError("Expected long".to_string()))
    }

    fn pop_float(&mut self) -> VmResult<f32> {
        self.pop()?
            .as_f32()
            .ok_or_else(|| VmError::TypeError("Expected float".to_string()))
    }

    fn pop_double(&mut self) -> VmResult<f64> {
        self.pop()?
            .as_f64()
            .ok_or_else(|| VmError::TypeError("Expected double".to_string()))
    }

    fn pop_ref(&mut self) -> VmResult<Value> {
        let value = self.pop()?;
        if !value.is_reference() {
            return Err(VmError::TypeError(format!(
                "Expected reference, found {}",
                value.type_name()
            )));
        }
        Ok(value)
    }

    fn local(&self, index: u16) -> VmResult<&Value> {
        self.locals.get(index as usize).ok_or_else(|| {
            VmError::RuntimeError(format!("local {} out of range", index))
        })
    }

    fn local_mut(&mut self, index: u16) -> VmResult<&mut Value> {
        self.locals.get_mut(index as usize).ok_or_else(|| {
            VmError::RuntimeError(format!("local {} out of range", index))
        })
    }
}

fn compare<T: PartialOrd>(a: T, b: T) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Greater) => 1,
        Some(Ordering::Equal) => 0,
        // NaN compares as less
        _ => -1,
    }
}

impl Vm {
    /// Run one activation of `method`
    pub(crate) fn execute(&self, method: &LoadedMethod, args: Vec<Value>) -> VmResult<Option<Value>> {
        let depth = self.call_depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(VmError::RuntimeError(format!(
                "call depth exceeded {}",
                MAX_CALL_DEPTH
            )));
        }
        self.call_depth.set(depth + 1);
        let result = self.run_frame(method, args);
        self.call_depth.set(depth);
        result
    }

    fn run_frame(&self, method: &LoadedMethod, args: Vec<Value>) -> VmResult<Option<Value>> {
        let mut frame = Frame::new(method, args)?;
        let code = &method.def.code;

        loop {
            let pc = frame.pc;
            let instr = code.get(pc).ok_or_else(|| {
                VmError::RuntimeError(format!(
                    "execution fell off the end of {}.{}{}",
                    method.owner, method.def.name, method.def.desc
                ))
            })?;
            frame.pc += 1;

            match self.step(&mut frame, method, instr) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(err) => {
                    let exception = self.raised_exception(err)?;
                    match self.find_handler(method, pc, &exception) {
                        Some(target) => {
                            frame.stack.clear();
                            frame.push(exception);
                            frame.pc = target;
                        }
                        None => return Err(VmError::Thrown(exception)),
                    }
                }
            }
        }
    }

    /// Exception object for an error raised inside an activation
    ///
    /// Faults become platform exceptions; other errors pass through.
    fn raised_exception(&self, err: VmError) -> VmResult<Value> {
        match err {
            VmError::Thrown(exception) => Ok(exception),
            VmError::ArithmeticError(msg) => {
                Ok(self.new_exception(names::ARITHMETIC_EXCEPTION, &msg))
            }
            VmError::NullPointer => {
                Ok(self.new_exception(names::NULL_POINTER_EXCEPTION, "null reference"))
            }
            other => Err(other),
        }
    }

    fn array_index(&self, len: usize, index: i32) -> VmResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < len)
            .ok_or_else(|| {
                self.throw(
                    names::INDEX_OUT_OF_BOUNDS_EXCEPTION,
                    &format!("index {} out of bounds for length {}", index, len),
                )
            })
    }

    fn find_handler(&self, method: &LoadedMethod, pc: usize, exception: &Value) -> Option<usize> {
        method
            .handlers
            .iter()
            .find(|h| {
                h.start <= pc
                    && pc < h.end
                    && h
                        .catch_type
                        .as_deref()
                        .map_or(true, |ty| self.is_instance_of(exception, ty))
            })
            .map(|h| h.handler)
    }

    fn step(&self, frame: &mut Frame, method: &LoadedMethod, instr: &Instr) -> VmResult<Flow> {
        match instr {
            Instr::Label(_) => {}
            Instr::Simple(op) => return self.op_simple(frame, *op),
            Instr::Const(c) => frame.push(match c {
                Constant::Int(v) => Value::Int(*v),
                Constant::Long(v) => Value::Long(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Double(v) => Value::Double(*v),
                Constant::Str(s) => Value::string(s),
            }),
            Instr::Var { op, index } => self.op_var(frame, *op, *index)?,
            Instr::Inc { index, delta } => {
                let slot = frame.local_mut(*index)?;
                let v = slot
                    .as_i32()
                    .ok_or_else(|| VmError::TypeError("Expected int".to_string()))?;
                *slot = Value::Int(v.wrapping_add(*delta));
            }
            Instr::Jump { op, target } => {
                if self.op_condition(frame, *op)? {
                    frame.pc = method.label(*target)?;
                }
            }
            Instr::Switch {
                low,
                default,
                targets,
            } => {
                let key = frame.pop_int()?;
                let target = usize::try_from(i64::from(key) - i64::from(*low))
                    .ok()
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                frame.pc = method.label(*target)?;
            }
            Instr::Field {
                op,
                owner,
                name,
                desc,
            } => self.op_field(frame, *op, owner, name, desc)?,
            Instr::Invoke {
                op,
                owner,
                name,
                desc,
            } => self.op_invoke(frame, *op, owner, name, desc)?,
            Instr::Type { op, desc } => self.op_type(frame, *op, desc)?,
            Instr::Frame(op) => self.op_frame(frame, *op)?,
        }
        Ok(Flow::Continue)
    }

    // ===== Operand-free Instructions =====

    fn op_simple(&self, frame: &mut Frame, op: Opcode) -> VmResult<Flow> {
        match op {
            Opcode::Nop => {}
            Opcode::AConstNull => frame.push(Value::Null),

            // Stack manipulation
            Opcode::Pop => {
                frame.pop()?;
            }
            Opcode::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Opcode::DupX1 => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a.clone());
                frame.push(b);
                frame.push(a);
            }
            Opcode::Swap => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a);
                frame.push(b);
            }

            // Arithmetic - int
            Opcode::IAdd => self.int_binop(frame, |a, b| Ok(a.wrapping_add(b)))?,
            Opcode::ISub => self.int_binop(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::IMul => self.int_binop(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::IDiv => self.int_binop(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticError("/ by zero".to_string()));
                }
                Ok(a.wrapping_div(b))
            })?,
            Opcode::IRem => self.int_binop(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticError("/ by zero".to_string()));
                }
                Ok(a.wrapping_rem(b))
            })?,
            Opcode::INeg => {
                let v = frame.pop_int()?;
                frame.push(Value::Int(v.wrapping_neg()));
            }

            // Arithmetic - long
            Opcode::LAdd => self.long_binop(frame, |a, b| Ok(a.wrapping_add(b)))?,
            Opcode::LSub => self.long_binop(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::LMul => self.long_binop(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::LDiv => self.long_binop(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticError("/ by zero".to_string()));
                }
                Ok(a.wrapping_div(b))
            })?,
            Opcode::LRem => self.long_binop(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticError("/ by zero".to_string()));
                }
                Ok(a.wrapping_rem(b))
            })?,
            Opcode::LNeg => {
                let v = frame.pop_long()?;
                frame.push(Value::Long(v.wrapping_neg()));
            }
            Opcode::LCmp => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Int(compare(a, b)));
            }

            // Arithmetic - float
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                frame.push(Value::Float(match op {
                    Opcode::FAdd => a + b,
                    Opcode::FSub => a - b,
                    Opcode::FMul => a * b,
                    _ => a / b,
                }));
            }
            Opcode::FNeg => {
                let v = frame.pop_float()?;
                frame.push(Value::Float(-v));
            }
            Opcode::FCmp => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                frame.push(Value::Int(compare(a, b)));
            }

            // Arithmetic - double
            Opcode::DAdd | Opcode::DSub | Opcode::DMul | Opcode::DDiv => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                frame.push(Value::Double(match op {
                    Opcode::DAdd => a + b,
                    Opcode::DSub => a - b,
                    Opcode::DMul => a * b,
                    _ => a / b,
                }));
            }
            Opcode::DNeg => {
                let v = frame.pop_double()?;
                frame.push(Value::Double(-v));
            }
            Opcode::DCmp => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                frame.push(Value::Int(compare(a, b)));
            }

            // Conversions
            Opcode::I2L => {
                let v = frame.pop_int()?;
                frame.push(Value::Long(i64::from(v)));
            }
            Opcode::I2F => {
                let v = frame.pop_int()?;
                frame.push(Value::Float(v as f32));
            }
            Opcode::I2D => {
                let v = frame.pop_int()?;
                frame.push(Value::Double(f64::from(v)));
            }
            Opcode::L2I => {
                let v = frame.pop_long()?;
                frame.push(Value::Int(v as i32));
            }
            Opcode::L2F => {
                let v = frame.pop_long()?;
                frame.push(Value::Float(v as f32));
            }
            Opcode::L2D => {
                let v = frame.pop_long()?;
                frame.push(Value::Double(v as f64));
            }
            Opcode::F2I => {
                let v = frame.pop_float()?;
                frame.push(Value::Int(v as i32));
            }
            Opcode::F2D => {
                let v = frame.pop_float()?;
                frame.push(Value::Double(f64::from(v)));
            }
            Opcode::D2I => {
                let v = frame.pop_double()?;
                frame.push(Value::Int(v as i32));
            }
            Opcode::D2L => {
                let v = frame.pop_double()?;
                frame.push(Value::Long(v as i64));
            }

            // Returns
            Opcode::IReturn
            | Opcode::LReturn
            | Opcode::FReturn
            | Opcode::DReturn
            | Opcode::AReturn => return Ok(Flow::Return(Some(frame.pop()?))),
            Opcode::Return => return Ok(Flow::Return(None)),

            // Exceptions and monitors
            Opcode::AThrow => {
                let exception = frame.pop_ref()?;
                if exception.is_null() {
                    return Err(VmError::NullPointer);
                }
                return Err(VmError::Thrown(exception));
            }
            // single-threaded interpreter: monitors only check their operand
            Opcode::MonitorEnter | Opcode::MonitorExit => {
                if frame.pop_ref()?.is_null() {
                    return Err(VmError::NullPointer);
                }
            }

            // Arrays
            Opcode::ArrayLength => {
                let array = frame.pop_ref()?;
                let len = match &array {
                    Value::Array(items) => items.borrow().len(),
                    Value::Null => return Err(VmError::NullPointer),
                    other => {
                        return Err(VmError::TypeError(format!(
                            "Expected array, found {}",
                            other.type_name()
                        )))
                    }
                };
                frame.push(Value::Int(len as i32));
            }
            Opcode::AALoad | Opcode::IALoad => {
                let index = frame.pop_int()?;
                let array = frame.pop_ref()?;
                let Value::Array(items) = array else {
                    return Err(VmError::NullPointer);
                };
                let items = items.borrow();
                let i = self.array_index(items.len(), index)?;
                frame.push(items[i].clone());
            }
            Opcode::AAStore | Opcode::IAStore => {
                let value = frame.pop()?;
                let index = frame.pop_int()?;
                let array = frame.pop_ref()?;
                let Value::Array(items) = array else {
                    return Err(VmError::NullPointer);
                };
                let mut items = items.borrow_mut();
                let i = self.array_index(items.len(), index)?;
                items[i] = value;
            }

            other => {
                return Err(VmError::RuntimeError(format!(
                    "{} requires operands",
                    other
                )))
            }
        }
        Ok(Flow::Continue)
    }

    fn int_binop(
        &self,
        frame: &mut Frame,
        f: impl FnOnce(i32, i32) -> VmResult<i32>,
    ) -> VmResult<()> {
        let b = frame.pop_int()?;
        let a = frame.pop_int()?;
        frame.push(Value::Int(f(a, b)?));
        Ok(())
    }

    fn long_binop(
        &self,
        frame: &mut Frame,
        f: impl FnOnce(i64, i64) -> VmResult<i64>,
    ) -> VmResult<()> {
        let b = frame.pop_long()?;
        let a = frame.pop_long()?;
        frame.push(Value::Long(f(a, b)?));
        Ok(())
    }

    // ===== Locals & Jumps =====

    fn op_var(&self, frame: &mut Frame, op: Opcode, index: u16) -> VmResult<()> {
        match op {
            Opcode::ILoad | Opcode::LLoad | Opcode::FLoad | Opcode::DLoad | Opcode::ALoad => {
                let value = frame.local(index)?.clone();
                frame.push(value);
            }
            Opcode::IStore | Opcode::LStore | Opcode::FStore | Opcode::DStore | Opcode::AStore => {
                let value = frame.pop()?;
                *frame.local_mut(index)? = value;
            }
            other => {
                return Err(VmError::RuntimeError(format!(
                    "{} is not a local variable opcode",
                    other
                )))
            }
        }
        Ok(())
    }

    fn op_condition(&self, frame: &mut Frame, op: Opcode) -> VmResult<bool> {
        Ok(match op {
            Opcode::Goto => true,
            Opcode::IfEq => frame.pop_int()? == 0,
            Opcode::IfNe => frame.pop_int()? != 0,
            Opcode::IfLt => frame.pop_int()? < 0,
            Opcode::IfGe => frame.pop_int()? >= 0,
            Opcode::IfGt => frame.pop_int()? > 0,
            Opcode::IfLe => frame.pop_int()? <= 0,
            Opcode::IfICmpEq
            | Opcode::IfICmpNe
            | Opcode::IfICmpLt
            | Opcode::IfICmpGe
            | Opcode::IfICmpGt
            | Opcode::IfICmpLe => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                match op {
                    Opcode::IfICmpEq => a == b,
                    Opcode::IfICmpNe => a != b,
                    Opcode::IfICmpLt => a < b,
                    Opcode::IfICmpGe => a >= b,
                    Opcode::IfICmpGt => a > b,
                    _ => a <= b,
                }
            }
            Opcode::IfACmpEq | Opcode::IfACmpNe => {
                let b = frame.pop_ref()?;
                let a = frame.pop_ref()?;
                a.ref_eq(&b) == (op == Opcode::IfACmpEq)
            }
            Opcode::IfNull => frame.pop_ref()?.is_null(),
            Opcode::IfNonNull => !frame.pop_ref()?.is_null(),
            other => {
                return Err(VmError::RuntimeError(format!(
                    "{} is not a jump opcode",
                    other
                )))
            }
        })
    }

    // ===== Fields, Calls & Types =====

    fn op_field(
        &self,
        frame: &mut Frame,
        op: Opcode,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> VmResult<()> {
        match op {
            Opcode::GetField => {
                let target = frame.pop_ref()?;
                let obj = target.as_object().ok_or(VmError::NullPointer)?;
                let value = obj.get_field(name).unwrap_or_else(|| Value::default_for(desc));
                frame.push(value);
            }
            Opcode::PutField => {
                let value = frame.pop()?;
                let target = frame.pop_ref()?;
                let obj = target.as_object().ok_or(VmError::NullPointer)?;
                obj.set_field(name, value);
            }
            Opcode::GetStatic => {
                let value = self
                    .get_static(owner, name)
                    .unwrap_or_else(|| Value::default_for(desc));
                frame.push(value);
            }
            Opcode::PutStatic => {
                let value = frame.pop()?;
                self.set_static(owner, name, value);
            }
            other => {
                return Err(VmError::RuntimeError(format!(
                    "{} is not a field opcode",
                    other
                )))
            }
        }
        Ok(())
    }

    fn op_invoke(
        &self,
        frame: &mut Frame,
        op: Opcode,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> VmResult<()> {
        let md = MethodDescriptor::parse(desc).map_err(|e| VmError::Verify(e.to_string()))?;
        let count = md.argument_count() + usize::from(op != Opcode::InvokeStatic);
        if frame.stack.len() < count {
            return Err(VmError::StackUnderflow);
        }
        let args = frame.stack.split_off(frame.stack.len() - count);
        trace!(op = %op, owner, name, desc, "invoke");

        let result = self.invoke(op, owner, name, desc, args)?;
        if md.ret.is_some() {
            let value = result.ok_or_else(|| {
                VmError::RuntimeError(format!("{}.{}{} returned no value", owner, name, desc))
            })?;
            frame.push(value);
        }
        Ok(())
    }

    fn op_type(&self, frame: &mut Frame, op: Opcode, desc: &str) -> VmResult<()> {
        match op {
            Opcode::New => {
                if !self.has_class(desc) {
                    return Err(VmError::NoSuchClass(desc.to_string()));
                }
                frame.push(Value::object(Object::new(desc)));
            }
            Opcode::CheckCast => {
                let value = frame.peek()?;
                if !value.is_null() && !self.is_instance_of(value, desc) {
                    return Err(self.throw(
                        names::CLASS_CAST_EXCEPTION,
                        &format!(
                            "{} cannot be cast to {}",
                            value.class_name().unwrap_or("?"),
                            desc
                        ),
                    ));
                }
            }
            Opcode::InstanceOf => {
                let value = frame.pop_ref()?;
                frame.push(Value::Int(i32::from(self.is_instance_of(&value, desc))));
            }
            Opcode::NewArray => {
                let len = frame.pop_int()?;
                let len = usize::try_from(len).map_err(|_| {
                    self.throw(names::NEGATIVE_ARRAY_SIZE_EXCEPTION, &len.to_string())
                })?;
                frame.push(Value::array(vec![Value::default_for(desc); len]));
            }
            other => {
                return Err(VmError::RuntimeError(format!(
                    "{} is not a type opcode",
                    other
                )))
            }
        }
        Ok(())
    }

    // ===== Coroutine Frames =====

    fn op_frame(&self, frame: &mut Frame, op: FrameOp) -> VmResult<()> {
        match op {
            FrameOp::Entry => {
                let entry = with_active_stack(|s| s.next_entry_index())?;
                let entry = i32::try_from(entry).map_err(|_| {
                    VmError::InvalidState(format!("entry index {} out of range", entry))
                })?;
                frame.push(Value::Int(entry));
            }
            FrameOp::Reserve { entry, slots } => {
                with_active_stack(|s| s.reserve_frame(entry, slots as usize))??;
            }
            FrameOp::Release => {
                with_active_stack(|s| s.release_frame())??;
            }
            FrameOp::Save { kind, slot } => {
                let value = frame.pop()?;
                with_active_stack(|s| s.save(kind, slot, value))??;
            }
            FrameOp::Restore { kind, slot } => {
                let value = with_active_stack(|s| s.restore(kind, slot))??;
                frame.push(value);
            }
            FrameOp::Suspend => return Err(suspend::suspend()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravel_bytecode::{access, names, ClassBuilder};

    fn run_static(vm: &Vm, body: impl FnOnce(&mut ravel_bytecode::MethodBuilder), desc: &str, args: Vec<Value>) -> VmResult<Option<Value>> {
        vm.load(
            ClassBuilder::new("test/Main")
                .method("run", desc, access::STATIC, body)
                .build(),
        )?;
        vm.invoke_static("test/Main", "run", desc, args)
    }

    #[test]
    fn test_loop_sum() {
        let vm = Vm::new();
        // sum = 0; for i in 0..n { sum += i }
        let result = run_static(
            &vm,
            |m| {
                let head = m.new_label();
                let done = m.new_label();
                m.iconst(0).istore(1).iconst(0).istore(2);
                m.place(head)
                    .iload(2)
                    .iload(0)
                    .jump(Opcode::IfICmpGe, done)
                    .iload(1)
                    .iload(2)
                    .op(Opcode::IAdd)
                    .istore(1)
                    .iinc(2, 1)
                    .goto(head);
                m.place(done).iload(1).ireturn();
            },
            "(I)I",
            vec![Value::Int(5)],
        )
        .unwrap();
        assert_eq!(result, Some(Value::Int(10)));
    }

    #[test]
    fn test_division_by_zero() {
        let vm = Vm::new();
        let result = run_static(
            &vm,
            |m| {
                m.iconst(1).iconst(0).op(Opcode::IDiv).ireturn();
            },
            "()I",
            vec![],
        );
        match result {
            Err(VmError::Thrown(exc)) => {
                assert_eq!(exc.class_name(), Some(names::ARITHMETIC_EXCEPTION))
            }
            other => panic!("expected arithmetic exception, got {:?}", other),
        }
    }

    #[test]
    fn test_faults_reach_handlers() {
        let vm = Vm::new();
        // try { 1 / 0 } catch (RuntimeException e) { return e.getMessage() }
        let result = run_static(
            &vm,
            |m| {
                let start = m.new_label();
                let end = m.new_label();
                let handler = m.new_label();
                m.try_catch(start, end, handler, Some(names::RUNTIME_EXCEPTION));
                m.place(start)
                    .iconst(1)
                    .iconst(0)
                    .op(Opcode::IDiv)
                    .op(Opcode::Pop)
                    .aconst_null()
                    .areturn();
                m.place(end);
                m.place(handler)
                    .invoke_virtual(names::THROWABLE, "getMessage", "()Lsys/String;")
                    .areturn();
            },
            "()Lsys/String;",
            vec![],
        )
        .unwrap();
        assert_eq!(result, Some(Value::string("/ by zero")));
    }

    #[test]
    fn test_fault_exception_classes() {
        type Body = fn(&mut ravel_bytecode::MethodBuilder);
        let cases: [(&str, Body); 4] = [
            (names::NULL_POINTER_EXCEPTION, |m: &mut ravel_bytecode::MethodBuilder| {
                m.aconst_null()
                    .get_field(names::THROWABLE, "message", "Lsys/String;")
                    .op(Opcode::Pop)
                    .ret();
            }),
            (names::CLASS_CAST_EXCEPTION, |m: &mut ravel_bytecode::MethodBuilder| {
                m.sconst("text").checkcast(names::THROWABLE).op(Opcode::Pop).ret();
            }),
            (names::INDEX_OUT_OF_BOUNDS_EXCEPTION, |m: &mut ravel_bytecode::MethodBuilder| {
                m.iconst(1)
                    .new_array("I")
                    .iconst(5)
                    .op(Opcode::IALoad)
                    .op(Opcode::Pop)
                    .ret();
            }),
            (names::NEGATIVE_ARRAY_SIZE_EXCEPTION, |m: &mut ravel_bytecode::MethodBuilder| {
                m.iconst(-1).new_array("I").op(Opcode::Pop).ret();
            }),
        ];
        for (expected, body) in cases {
            let vm = Vm::new();
            match run_static(&vm, body, "()V", vec![]) {
                Err(VmError::Thrown(exc)) => {
                    assert_eq!(exc.class_name(), Some(expected));
                    assert!(vm.is_instance_of(&exc, names::RUNTIME_EXCEPTION));
                }
                other => panic!("expected {}, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_handler_catches_matching_type() {
        let vm = Vm::new();
        let result = run_static(
            &vm,
            |m| {
                let start = m.new_label();
                let end = m.new_label();
                let handler = m.new_label();
                m.try_catch(start, end, handler, Some(names::RUNTIME_EXCEPTION));
                m.place(start)
                    .new_object(names::ILLEGAL_STATE_EXCEPTION)
                    .op(Opcode::Dup)
                    .sconst("boom")
                    .invoke_special(
                        names::ILLEGAL_STATE_EXCEPTION,
                        names::CONSTRUCTOR,
                        "(Lsys/String;)V",
                    )
                    .athrow();
                m.place(end);
                m.place(handler)
                    .invoke_virtual(names::THROWABLE, "getMessage", "()Lsys/String;")
                    .areturn();
            },
            "()Lsys/String;",
            vec![],
        )
        .unwrap();
        assert_eq!(result, Some(Value::string("boom")));
    }

    #[test]
    fn test_handler_skips_other_types() {
        let vm = Vm::new();
        let result = run_static(
            &vm,
            |m| {
                let start = m.new_label();
                let end = m.new_label();
                let handler = m.new_label();
                m.try_catch(start, end, handler, Some(names::ILLEGAL_STATE_EXCEPTION));
                m.place(start)
                    .new_object(names::ERROR)
                    .op(Opcode::Dup)
                    .invoke_special(names::ERROR, names::CONSTRUCTOR, "()V")
                    .athrow();
                m.place(end);
                m.place(handler).op(Opcode::Pop).ret();
            },
            "()V",
            vec![],
        );
        match result {
            Err(VmError::Thrown(exc)) => assert_eq!(exc.class_name(), Some(names::ERROR)),
            other => panic!("expected thrown error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_ops_need_coroutine() {
        let vm = Vm::new();
        let result = run_static(
            &vm,
            |m| {
                m.emit(Instr::Frame(FrameOp::Entry)).op(Opcode::Pop).ret();
            },
            "()V",
            vec![],
        );
        assert!(matches!(result, Err(VmError::InvalidState(_))));
    }

    #[test]
    fn test_entry_index_beyond_int_range() {
        use crate::snapshot::{CoroutineSnapshot, SnapshotState, SnapshotValue, StackSnapshot};
        use crate::{Coroutine, FrameDescriptor, MethodProto};
        use std::rc::Rc;

        let vm = Rc::new(Vm::new());
        vm.load(
            ClassBuilder::new("test/Main")
                .method("run", "()V", access::STATIC, |m| {
                    m.emit(Instr::Frame(FrameOp::Entry)).op(Opcode::Pop).ret();
                })
                .build(),
        )
        .unwrap();
        let snapshot = CoroutineSnapshot {
            state: SnapshotState::Suspended,
            stack: StackSnapshot {
                frames: vec![FrameDescriptor {
                    resume_index: u32::MAX,
                    base: 0,
                }],
                top: 0,
                prim: vec![0; 4],
                refs: vec![SnapshotValue::Null; 4],
                heap: Vec::new(),
            },
        };
        let co = Coroutine::restore(
            MethodProto::new_static(Rc::clone(&vm), "test/Main", "run", "()V", vec![]),
            &snapshot,
        )
        .unwrap();
        assert!(matches!(co.run(), Err(VmError::InvalidState(_))));
    }

    #[test]
    fn test_arrays_and_switch() {
        let vm = Vm::new();
        let result = run_static(
            &vm,
            |m| {
                let one = m.new_label();
                let two = m.new_label();
                let other = m.new_label();
                m.iconst(3)
                    .new_array("I")
                    .astore(1)
                    .aload(1)
                    .iconst(1)
                    .iconst(40)
                    .op(Opcode::IAStore)
                    .iload(0)
                    .table_switch(1, other, vec![one, two]);
                m.place(one).iconst(1).ireturn();
                m.place(two)
                    .aload(1)
                    .iconst(1)
                    .op(Opcode::IALoad)
                    .aload(1)
                    .op(Opcode::ArrayLength)
                    .op(Opcode::IAdd)
                    .ireturn();
                m.place(other).iconst(-1).ireturn();
            },
            "(I)I",
            vec![Value::Int(2)],
        )
        .unwrap();
        assert_eq!(result, Some(Value::Int(43)));
    }

    #[test]
    fn test_call_depth_limit() {
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let vm = Vm::new();
                let result = run_static(
                    &vm,
                    |m| {
                        m.invoke_static("test/Main", "run", "()V").ret();
                    },
                    "()V",
                    vec![],
                );
                matches!(result, Err(VmError::RuntimeError(_)))
            })
            .unwrap();
        assert!(handle.join().unwrap());
    }
}
