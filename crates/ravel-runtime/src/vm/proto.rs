//! Coroutine bodies backed by interpreted methods

use super::Vm;
use crate::coroutine::CoroutineProto;
use crate::value::Value;
use crate::VmResult;
use std::rc::Rc;

enum Target {
    Static { owner: String },
    Virtual { receiver: Value },
}

/// A coroutine body that invokes one method on every run
///
/// The method must be instrumented for suspension to resume where it left
/// off; each run re-enters it with the same arguments and the restore code
/// takes over from the coroutine's stack.
pub struct MethodProto {
    vm: Rc<Vm>,
    target: Target,
    name: String,
    desc: String,
    args: Vec<Value>,
}

impl MethodProto {
    /// Body invoking a static method
    pub fn new_static(vm: Rc<Vm>, owner: &str, name: &str, desc: &str, args: Vec<Value>) -> Self {
        Self {
            vm,
            target: Target::Static {
                owner: owner.to_string(),
            },
            name: name.to_string(),
            desc: desc.to_string(),
            args,
        }
    }

    /// Body invoking an instance method on `receiver`
    pub fn new_virtual(vm: Rc<Vm>, receiver: Value, name: &str, desc: &str, args: Vec<Value>) -> Self {
        Self {
            vm,
            target: Target::Virtual { receiver },
            name: name.to_string(),
            desc: desc.to_string(),
            args,
        }
    }
}

impl CoroutineProto for MethodProto {
    fn co_execute(&mut self) -> VmResult<()> {
        match &self.target {
            Target::Static { owner } => {
                self.vm
                    .invoke_static(owner, &self.name, &self.desc, self.args.clone())?;
            }
            Target::Virtual { receiver } => {
                self.vm.invoke_virtual(
                    receiver.clone(),
                    &self.name,
                    &self.desc,
                    self.args.clone(),
                )?;
            }
        }
        Ok(())
    }
}
