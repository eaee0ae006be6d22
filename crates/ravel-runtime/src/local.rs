//! Per-coroutine variables
//!
//! A [`CoroutineLocal`] holds one value per coroutine, scoped to whichever
//! coroutine is running on the calling thread. Maps hold their keys weakly:
//! once a `CoroutineLocal` is dropped its entries are purged on the next
//! insert into that coroutine's map.

use crate::coroutine::with_active_locals;
use crate::VmResult;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Identity of a `CoroutineLocal`
pub(crate) struct KeyToken(u64);

/// Storage of one coroutine's local values
#[derive(Default)]
pub(crate) struct LocalMap {
    entries: FxHashMap<u64, (Weak<KeyToken>, Box<dyn Any>)>,
}

impl LocalMap {
    fn get<T: Clone + 'static>(&self, key: &KeyToken) -> Option<T> {
        self.entries
            .get(&key.0)
            .and_then(|(_, value)| value.downcast_ref::<T>())
            .cloned()
    }

    fn insert<T: 'static>(&mut self, key: &Rc<KeyToken>, value: T) {
        self.entries.retain(|_, (owner, _)| owner.strong_count() > 0);
        self.entries
            .insert(key.0, (Rc::downgrade(key), Box::new(value)));
    }

    fn remove<T: 'static>(&mut self, key: &KeyToken) -> Option<T> {
        self.entries
            .remove(&key.0)
            .and_then(|(_, value)| value.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Number of live entries
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A variable with one value per coroutine
pub struct CoroutineLocal<T> {
    key: Rc<KeyToken>,
    init: Box<dyn Fn() -> T>,
}

impl<T: Clone + 'static> CoroutineLocal<T> {
    /// Create a variable whose per-coroutine value starts as `init()`
    pub fn new(init: impl Fn() -> T + 'static) -> Self {
        Self {
            key: Rc::new(KeyToken(NEXT_KEY.fetch_add(1, Ordering::Relaxed))),
            init: Box::new(init),
        }
    }

    /// Current coroutine's value, initialized on first access
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` if no coroutine is running.
    pub fn get(&self) -> VmResult<T> {
        if let Some(value) = with_active_locals(|map| map.get::<T>(&self.key))? {
            return Ok(value);
        }
        // init may itself touch other locals, so the map is not held here
        let value = (self.init)();
        with_active_locals(|map| map.insert(&self.key, value.clone()))?;
        Ok(value)
    }

    /// Set the current coroutine's value
    pub fn set(&self, value: T) -> VmResult<()> {
        with_active_locals(|map| map.insert(&self.key, value))
    }

    /// Remove the current coroutine's value, returning it if present
    pub fn remove(&self) -> VmResult<Option<T>> {
        with_active_locals(|map| map.remove::<T>(&self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::Coroutine;
    use crate::VmError;
    use std::cell::RefCell;

    #[test]
    fn test_requires_running_coroutine() {
        let local = CoroutineLocal::new(|| 0i32);
        assert!(matches!(local.get(), Err(VmError::InvalidState(_))));
        assert!(local.set(1).is_err());
    }

    #[test]
    fn test_lazy_init_and_remove() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&seen);
        let co = Coroutine::new(move || -> VmResult<()> {
            let local = CoroutineLocal::new(|| String::from("init"));
            out.borrow_mut().push(local.get()?);
            local.set("changed".to_string())?;
            out.borrow_mut().push(local.get()?);
            out.borrow_mut().push(local.remove()?.unwrap_or_default());
            out.borrow_mut().push(local.get()?);
            Ok(())
        });
        co.run().unwrap();
        assert_eq!(*seen.borrow(), vec!["init", "changed", "changed", "init"]);
    }

    #[test]
    fn test_dropped_keys_are_purged() {
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&sizes);
        let co = Coroutine::new(move || -> VmResult<()> {
            let first = CoroutineLocal::new(|| 1u8);
            first.set(2)?;
            drop(first);
            let second = CoroutineLocal::new(|| 1u8);
            second.set(3)?;
            out.borrow_mut()
                .push(with_active_locals(|map| map.len())?);
            Ok(())
        });
        co.run().unwrap();
        assert_eq!(*sizes.borrow(), vec![1]);
    }
}
