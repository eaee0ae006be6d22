//! Producer/consumer iteration over a coroutine
//!
//! The coroutine body receives a [`Producer`] and hands out one element per
//! suspension; the consumer side drives the coroutine only as far as needed
//! to obtain the next element. Dropping a [`CoIterator`] before it is
//! exhausted abandons the body where it is suspended.

use crate::coroutine::{Coroutine, CoroutineProto, CoroutineState};
use crate::snapshot::CoroutineSnapshot;
use crate::{VmError, VmResult};
use std::cell::RefCell;
use std::rc::Rc;

/// Producer handle given to the coroutine body
pub struct Producer<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> Producer<T> {
    /// Hand out an element; the body must suspend afterwards
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` if the previous element has not been
    /// taken yet.
    pub fn produce(&self, element: T) -> VmResult<()> {
        let mut slot = self.slot.borrow_mut();
        if slot.is_some() {
            return Err(VmError::InvalidState(
                "an element is already pending".to_string(),
            ));
        }
        *slot = Some(element);
        Ok(())
    }
}

/// Iterator over the elements produced by a coroutine
pub struct CoIterator<T> {
    co: Coroutine,
    slot: Rc<RefCell<Option<T>>>,
}

impl<T: 'static> CoIterator<T> {
    /// Create an iterator whose body is built by `make`
    pub fn new<P, F>(make: F) -> Self
    where
        F: FnOnce(Producer<T>) -> P,
        P: CoroutineProto + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let producer = Producer {
            slot: Rc::clone(&slot),
        };
        Self {
            co: Coroutine::new(make(producer)),
            slot,
        }
    }

    /// Create an iterator with an initial stack size hint
    pub fn with_stack_size<P, F>(make: F, stack_size: usize) -> VmResult<Self>
    where
        F: FnOnce(Producer<T>) -> P,
        P: CoroutineProto + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let producer = Producer {
            slot: Rc::clone(&slot),
        };
        Ok(Self {
            co: Coroutine::with_stack_size(make(producer), stack_size)?,
            slot,
        })
    }

    /// Drive the body until an element is pending or it finishes
    pub fn has_next(&mut self) -> VmResult<bool> {
        while self.slot.borrow().is_none() && self.co.state() != CoroutineState::Finished {
            self.co.run()?;
        }
        Ok(self.slot.borrow().is_some())
    }

    /// Take the pending element
    ///
    /// # Errors
    ///
    /// Returns `VmError::Exhausted` once the body has finished without
    /// producing another element.
    pub fn take_next(&mut self) -> VmResult<T> {
        if !self.has_next()? {
            return Err(VmError::Exhausted);
        }
        self.slot.borrow_mut().take().ok_or(VmError::Exhausted)
    }

    /// Capture the iterator between elements
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` while an element is pending or once
    /// the body has finished.
    pub fn snapshot(&self) -> VmResult<CoroutineSnapshot> {
        if self.slot.borrow().is_some() {
            return Err(VmError::InvalidState(
                "an element is pending".to_string(),
            ));
        }
        self.co.snapshot()
    }

    /// Rebuild a captured iterator; `make` supplies the body again
    ///
    /// # Errors
    ///
    /// Returns `VmError::Snapshot` if the captured stack is inconsistent.
    pub fn restore<P, F>(make: F, snapshot: &CoroutineSnapshot) -> VmResult<Self>
    where
        F: FnOnce(Producer<T>) -> P,
        P: CoroutineProto + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let producer = Producer {
            slot: Rc::clone(&slot),
        };
        Ok(Self {
            co: Coroutine::restore(make(producer), snapshot)?,
            slot,
        })
    }

    /// The underlying coroutine
    pub fn coroutine(&self) -> &Coroutine {
        &self.co
    }
}

impl<T: 'static> Iterator for CoIterator<T> {
    type Item = VmResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.take_next()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::with_active_stack;
    use crate::suspend;

    /// Hand-instrumented producer of "X0".."X{count-1}"
    fn producer_body(producer: Producer<String>, count: i32) -> impl FnMut() -> VmResult<()> {
        move || {
            let entry = with_active_stack(|s| s.next_entry_index())?;
            let i = match entry {
                0 => 0,
                _ => with_active_stack(|s| s.get_int(0))??,
            };
            if i < count {
                producer.produce(format!("X{}", i))?;
                with_active_stack(|s| -> VmResult<()> {
                    s.reserve_frame(1, 1)?;
                    s.push_int(0, i + 1)
                })??;
                return Err(suspend::suspend());
            }
            with_active_stack(|s| s.release_frame())??;
            Ok(())
        }
    }

    #[test]
    fn test_has_next_does_not_skip() {
        let mut it = CoIterator::new(|p| producer_body(p, 3));
        assert!(it.has_next().unwrap());
        assert!(it.has_next().unwrap());
        assert_eq!(it.take_next().unwrap(), "X0");
        assert_eq!(it.take_next().unwrap(), "X1");
        assert_eq!(it.take_next().unwrap(), "X2");
        assert!(!it.has_next().unwrap());
        assert!(matches!(it.take_next(), Err(VmError::Exhausted)));
        assert_eq!(it.coroutine().state(), CoroutineState::Finished);
    }

    #[test]
    fn test_iterator_adapter() {
        let it = CoIterator::new(|p| producer_body(p, 4));
        let items: VmResult<Vec<String>> = it.collect();
        assert_eq!(items.unwrap(), vec!["X0", "X1", "X2", "X3"]);
    }

    #[test]
    fn test_snapshot_copies_resume_independently() {
        let mut it = CoIterator::new(|p| producer_body(p, 3));
        assert_eq!(it.take_next().unwrap(), "X0");

        let json = it.snapshot().unwrap().to_json().unwrap();
        let snapshot = CoroutineSnapshot::from_json(&json).unwrap();
        let copy = CoIterator::restore(|p| producer_body(p, 3), &snapshot).unwrap();

        let rest: VmResult<Vec<String>> = copy.collect();
        assert_eq!(rest.unwrap(), vec!["X1", "X2"]);
        let rest: VmResult<Vec<String>> = it.collect();
        assert_eq!(rest.unwrap(), vec!["X1", "X2"]);
    }

    #[test]
    fn test_snapshot_with_pending_element_rejected() {
        let mut it = CoIterator::new(|p| producer_body(p, 2));
        assert!(it.has_next().unwrap());
        assert!(matches!(it.snapshot(), Err(VmError::InvalidState(_))));
    }

    #[test]
    fn test_double_produce_rejected() {
        let slot = Rc::new(RefCell::new(None));
        let producer = Producer { slot };
        producer.produce(1).unwrap();
        assert!(matches!(producer.produce(2), Err(VmError::InvalidState(_))));
    }

    #[test]
    fn test_body_error_surfaces() {
        let mut it: CoIterator<i32> = CoIterator::new(|_p| {
            || -> VmResult<()> { Err(VmError::RuntimeError("bad".to_string())) }
        });
        assert!(matches!(it.has_next(), Err(VmError::RuntimeError(_))));
        assert!(!it.has_next().unwrap());
    }
}
