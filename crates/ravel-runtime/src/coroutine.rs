//! Coroutine state machine
//!
//! A [`Coroutine`] owns a [`Stack`] and a prototype. Each [`Coroutine::run`]
//! installs the stack as the thread's active stack, invokes the prototype,
//! and classifies the outcome:
//!
//! - normal completion: `Finished`
//! - the suspension signal: `Suspended`, with the entry cursor rewound so the
//!   next run re-enters every saved frame from the outermost one
//! - any other error: `Finished`, and the error is returned to the caller
//!
//! Whatever was active before the call is restored afterwards, so coroutines
//! can be created and run from inside other coroutines.
//!
//! Between runs a coroutine can be captured with [`Coroutine::snapshot`] and
//! rebuilt, possibly in another process, with [`Coroutine::restore`].

use crate::local::LocalMap;
use crate::snapshot::{CoroutineSnapshot, SnapshotState};
use crate::stack::Stack;
use crate::suspend;
use crate::{VmError, VmResult};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Unique identifier for a Coroutine
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CoroutineId(u64);

static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

impl CoroutineId {
    fn next() -> Self {
        CoroutineId(NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "co#{}", self.0)
    }
}

/// State of a Coroutine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created, never run
    New,
    /// Inside `run()`
    Running,
    /// Paused at a suspension point
    Suspended,
    /// Body completed or failed; cannot run again
    Finished,
}

/// The suspendable entry computation of a coroutine
///
/// Invoked once per `run()`. An instrumented body re-enters its saved
/// frames through the active [`Stack`].
pub trait CoroutineProto {
    /// Execute (or re-enter) the body
    fn co_execute(&mut self) -> VmResult<()>;
}

impl<F> CoroutineProto for F
where
    F: FnMut() -> VmResult<()>,
{
    fn co_execute(&mut self) -> VmResult<()> {
        self()
    }
}

// ===== Thread-active coroutine =====

#[derive(Clone)]
struct Active {
    id: CoroutineId,
    stack: Rc<RefCell<Stack>>,
    locals: Rc<RefCell<LocalMap>>,
}

thread_local! {
    static ACTIVE: RefCell<Option<Active>> = const { RefCell::new(None) };
}

/// Restores the previously active coroutine when dropped
struct ActiveGuard {
    previous: Option<Active>,
}

impl ActiveGuard {
    fn install(active: Active) -> Self {
        let previous = ACTIVE.with(|a| a.borrow_mut().replace(active));
        Self { previous }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|a| *a.borrow_mut() = previous);
    }
}

fn no_coroutine() -> VmError {
    VmError::InvalidState("no coroutine is running on this thread".to_string())
}

/// Run `f` on the stack of the coroutine running on this thread
///
/// # Errors
///
/// Returns `VmError::InvalidState` if no coroutine is running.
pub fn with_active_stack<R>(f: impl FnOnce(&mut Stack) -> R) -> VmResult<R> {
    let stack = ACTIVE
        .with(|a| a.borrow().as_ref().map(|a| Rc::clone(&a.stack)))
        .ok_or_else(no_coroutine)?;
    let mut stack = stack
        .try_borrow_mut()
        .map_err(|_| VmError::InvalidState("coroutine stack is busy".to_string()))?;
    Ok(f(&mut stack))
}

pub(crate) fn with_active_locals<R>(f: impl FnOnce(&mut LocalMap) -> R) -> VmResult<R> {
    let locals = ACTIVE
        .with(|a| a.borrow().as_ref().map(|a| Rc::clone(&a.locals)))
        .ok_or_else(no_coroutine)?;
    let mut locals = locals.borrow_mut();
    Ok(f(&mut locals))
}

// ===== Coroutine =====

/// A suspendable computation
pub struct Coroutine {
    id: CoroutineId,
    state: Cell<CoroutineState>,
    stack: Rc<RefCell<Stack>>,
    locals: Rc<RefCell<LocalMap>>,
    proto: RefCell<Box<dyn CoroutineProto>>,
}

impl Coroutine {
    /// Create a coroutine with the default stack size
    pub fn new(proto: impl CoroutineProto + 'static) -> Self {
        Self::from_parts(Box::new(proto), Stack::default())
    }

    /// Create a coroutine with an initial stack size hint
    ///
    /// # Errors
    ///
    /// Returns `VmError::IllegalArgument` if `stack_size` is zero.
    pub fn with_stack_size(proto: impl CoroutineProto + 'static, stack_size: usize) -> VmResult<Self> {
        Ok(Self::from_parts(Box::new(proto), Stack::new(stack_size)?))
    }

    fn from_parts(proto: Box<dyn CoroutineProto>, stack: Stack) -> Self {
        let id = CoroutineId::next();
        trace!(coroutine = %id, "created");
        Self {
            id,
            state: Cell::new(CoroutineState::New),
            stack: Rc::new(RefCell::new(stack)),
            locals: Rc::new(RefCell::new(LocalMap::default())),
            proto: RefCell::new(proto),
        }
    }

    /// Unique id
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> CoroutineState {
        self.state.get()
    }

    /// Inspect the coroutine's stack
    pub fn stack(&self) -> Ref<'_, Stack> {
        self.stack.borrow()
    }

    /// Capture the coroutine between runs
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` unless the coroutine is `New` or
    /// `Suspended`.
    pub fn snapshot(&self) -> VmResult<CoroutineSnapshot> {
        let state = match self.state.get() {
            CoroutineState::New => SnapshotState::New,
            CoroutineState::Suspended => SnapshotState::Suspended,
            _ => return Err(VmError::InvalidState("Not new or suspended".to_string())),
        };
        let stack = self
            .stack
            .try_borrow()
            .map_err(|_| VmError::InvalidState("coroutine stack is busy".to_string()))?
            .snapshot();
        trace!(coroutine = %self.id, frames = stack.frame_count(), "captured");
        Ok(CoroutineSnapshot { state, stack })
    }

    /// Rebuild a captured coroutine with `proto` as its body
    ///
    /// The result has a fresh id and no coroutine-local values.
    ///
    /// # Errors
    ///
    /// Returns `VmError::Snapshot` if the captured stack is inconsistent.
    pub fn restore(proto: impl CoroutineProto + 'static, snapshot: &CoroutineSnapshot) -> VmResult<Self> {
        let co = Self::from_parts(Box::new(proto), Stack::from_snapshot(&snapshot.stack)?);
        co.state.set(match snapshot.state {
            SnapshotState::New => CoroutineState::New,
            SnapshotState::Suspended => CoroutineState::Suspended,
        });
        debug!(coroutine = %co.id, "restored");
        Ok(co)
    }

    /// Id of the coroutine running on this thread, if any
    pub fn current_id() -> Option<CoroutineId> {
        ACTIVE.with(|a| a.borrow().as_ref().map(|a| a.id))
    }

    /// Run until the body suspends or completes
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` unless the coroutine is `New` or
    /// `Suspended`; otherwise returns any non-signal error raised by the
    /// body, after which the coroutine is `Finished`.
    pub fn run(&self) -> VmResult<()> {
        match self.state.get() {
            CoroutineState::New | CoroutineState::Suspended => {}
            _ => return Err(VmError::InvalidState("Not new or suspended".to_string())),
        }

        let mut proto = self
            .proto
            .try_borrow_mut()
            .map_err(|_| VmError::InvalidState("Not new or suspended".to_string()))?;

        self.state.set(CoroutineState::Running);
        debug!(coroutine = %self.id, "running");

        let result = {
            let _guard = ActiveGuard::install(Active {
                id: self.id,
                stack: Rc::clone(&self.stack),
                locals: Rc::clone(&self.locals),
            });
            proto.co_execute()
        };

        match result {
            Ok(()) => {
                self.state.set(CoroutineState::Finished);
                debug!(coroutine = %self.id, "finished");
                Ok(())
            }
            Err(err) if suspend::is_suspend_error(&err) => {
                self.stack.borrow_mut().resume_stack();
                self.state.set(CoroutineState::Suspended);
                debug!(coroutine = %self.id, "suspended");
                Ok(())
            }
            Err(err) => {
                self.state.set(CoroutineState::Finished);
                debug!(coroutine = %self.id, error = %err, "failed");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish()
    }
}
