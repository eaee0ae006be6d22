//! The suspension signal
//!
//! Suspending raises one shared exception object of class
//! `ravel/SuspendExecution`. It is allocated once per thread, carries no
//! payload, and is recognised by identity when it reaches the coroutine
//! boundary.

use crate::object::Object;
use crate::value::Value;
use crate::VmError;
use ravel_bytecode::names;
use std::rc::Rc;

thread_local! {
    static SIGNAL: Rc<Object> = Rc::new(Object::new(names::SUSPEND_EXECUTION));
}

/// The shared signal object
pub fn signal() -> Value {
    SIGNAL.with(|s| Value::Object(Rc::clone(s)))
}

/// The error that unwinds a suspending call chain
pub fn suspend() -> VmError {
    VmError::Thrown(signal())
}

/// Whether `value` is the suspension signal
pub fn is_signal(value: &Value) -> bool {
    match value {
        Value::Object(obj) => SIGNAL.with(|s| Rc::ptr_eq(s, obj)),
        _ => false,
    }
}

/// Whether `err` carries the suspension signal
pub fn is_suspend_error(err: &VmError) -> bool {
    matches!(err, VmError::Thrown(v) if is_signal(v))
}

/// Body of the suspend primitive before instrumentation
///
/// Any call that survives to execution time did not go through the
/// instrumenter, which is a usage error.
pub fn yield_uninstrumented() -> Result<(), VmError> {
    Err(VmError::NotInstrumented)
}
