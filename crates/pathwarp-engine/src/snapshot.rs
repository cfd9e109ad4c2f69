//! Read-mostly publication with deferred reclamation.
//!
//! Readers take an `Arc` to the current table and traverse it without
//! holding any lock. Writers build a modified copy and publish it with a
//! pointer swap. A table (and every rule or node reachable only from it)
//! is freed when the last reader that loaded it drops its `Arc`, which is
//! the grace period: nothing a concurrent lookup can still reach is ever
//! freed under it.
//!
//! All writers across the engine serialize on one [`AdminLock`]; holding
//! an [`Exclusive`] token is the proof required to publish.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

/// The engine-wide exclusive section for administrative mutations.
#[derive(Debug, Default)]
pub struct AdminLock {
    inner: Mutex<()>,
}

/// Proof that the holder is inside the exclusive section.
pub struct Exclusive<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl AdminLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the exclusive section, waiting for any other writer.
    pub fn enter(&self) -> Exclusive<'_> {
        Exclusive {
            _guard: self.inner.lock(),
        }
    }
}

/// A published value that readers load and writers replace wholesale.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// The current snapshot. The read lock is held only for the `Arc`
    /// clone, never across a traversal.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Replace the published value. The previous value stays alive for
    /// readers that already loaded it.
    pub fn publish(&self, _section: &Exclusive<'_>, value: T) {
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(value));
        drop(previous);
    }
}

impl<T: Clone> SnapshotCell<T> {
    /// Copy the current value, let `f` modify the copy, publish it.
    pub fn update<R>(&self, section: &Exclusive<'_>, f: impl FnOnce(&mut T) -> R) -> R {
        let mut next = T::clone(&self.load());
        let result = f(&mut next);
        self.publish(section, next);
        result
    }
}
