//! Ravel Coroutine Runtime
//!
//! This crate provides the runtime side of Ravel coroutines:
//! - The per-coroutine frame [`Stack`] that instrumented methods save into
//! - The [`Coroutine`] state machine and the suspension signal
//! - Per-coroutine variables ([`CoroutineLocal`]) and a producer/consumer
//!   iterator ([`CoIterator`])
//! - Serializable snapshots of suspended coroutines ([`CoroutineSnapshot`])
//! - An interpreter ([`Vm`]) that executes compiled units, original or
//!   instrumented

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod coroutine;
pub mod iterator;
pub mod local;
pub mod object;
pub mod snapshot;
pub mod stack;
pub mod suspend;
pub mod value;
pub mod vm;

pub use coroutine::{with_active_stack, Coroutine, CoroutineId, CoroutineProto, CoroutineState};
pub use iterator::{CoIterator, Producer};
pub use local::CoroutineLocal;
pub use object::Object;
pub use snapshot::{CoroutineSnapshot, SnapshotState, StackSnapshot};
pub use stack::{FrameDescriptor, Stack, DEFAULT_STACK_SIZE};
pub use value::Value;
pub use vm::{MethodProto, NativeFn, Vm};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// An exception object raised by bytecode or a native
    #[error("Uncaught exception: {0}")]
    Thrown(Value),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The suspend primitive was called from code that was not instrumented
    #[error("Not instrumented: the suspend primitive was called outside an instrumented method")]
    NotInstrumented,

    /// Invalid argument
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// No more elements
    #[error("No more elements")]
    Exhausted,

    /// Unknown class
    #[error("No such class: {0}")]
    NoSuchClass(String),

    /// Unknown method
    #[error("No such method: {0}")]
    NoSuchMethod(String),

    /// Unknown field
    #[error("No such field: {0}")]
    NoSuchField(String),

    /// Null pointer exception
    #[error("Null pointer exception")]
    NullPointer,

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Arithmetic error
    #[error("Arithmetic error: {0}")]
    ArithmeticError(String),

    /// Malformed coroutine snapshot
    #[error("Invalid snapshot: {0}")]
    Snapshot(String),

    /// Unit failed verification on load
    #[error("Verification failed: {0}")]
    Verify(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
