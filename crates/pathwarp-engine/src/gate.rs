//! Access gate: per-call decision whether the engine steps aside.
//!
//! Every hook asks [`AccessGate::should_bypass`] first and, independently,
//! checks the caller's uid against the [`Blocklist`]. Neither consults the
//! rule store.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use dashmap::DashSet;
use pathwarp_types::Uid;

use crate::error::{EngineError, EngineResult};
use crate::snapshot::Exclusive;

bitflags! {
    /// Access mask requested by a permission check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        const EXEC = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

// ============================================================================
// Caller context
// ============================================================================

/// What the engine knows about the context a hook runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: Uid,
    /// Short process name.
    pub comm: String,
    /// Kernel-internal worker with no user-space counterpart.
    pub kernel_worker: bool,
    pub exiting: bool,
    pub has_address_space: bool,
    /// Interrupt or crash context.
    pub atomic_context: bool,
}

impl Caller {
    /// An ordinary live process.
    pub fn process(uid: Uid, comm: impl Into<String>) -> Self {
        Self {
            uid,
            comm: comm.into(),
            kernel_worker: false,
            exiting: false,
            has_address_space: true,
            atomic_context: false,
        }
    }

    /// The calling thread of this process.
    #[cfg(unix)]
    pub fn current() -> Self {
        let uid = rustix::process::getuid().as_raw();
        let comm = std::fs::read_to_string("/proc/thread-self/comm")
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default();
        Self::process(uid, comm)
    }
}

// ============================================================================
// Recursion guard
// ============================================================================

thread_local! {
    static IN_ENGINE: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is already executing inside the engine.
pub fn in_engine() -> bool {
    IN_ENGINE.with(Cell::get)
}

/// Marks the current thread as inside the engine until dropped.
#[derive(Debug)]
pub struct ReentryGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ReentryGuard {
    /// `None` if the thread is already inside the engine.
    pub fn enter() -> Option<Self> {
        IN_ENGINE.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(Self {
                    _not_send: std::marker::PhantomData,
                })
            }
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_ENGINE.with(|flag| flag.set(false));
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Global enable switch plus the fixed bypass policy.
#[derive(Debug)]
pub struct AccessGate {
    enabled: AtomicBool,
    critical_prefixes: Vec<String>,
}

impl AccessGate {
    pub fn new(enabled: bool, critical_prefixes: Vec<String>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            critical_prefixes,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Set the switch, returning its previous value.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    fn is_critical(&self, caller: &Caller) -> bool {
        caller.kernel_worker
            || self
                .critical_prefixes
                .iter()
                .any(|p| caller.comm.starts_with(p.as_str()))
    }

    /// Short-circuits in order: disabled, re-entry, abnormal context,
    /// exiting, critical caller.
    pub fn should_bypass(&self, caller: &Caller) -> bool {
        !self.is_enabled()
            || in_engine()
            || caller.atomic_context
            || !caller.has_address_space
            || caller.exiting
            || self.is_critical(caller)
    }
}

// ============================================================================
// Blocklist
// ============================================================================

/// Caller uids for which the engine behaves as if disabled.
#[derive(Debug, Default)]
pub struct Blocklist {
    uids: DashSet<Uid>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uids.contains(&uid)
    }

    pub fn add(&self, _section: &Exclusive<'_>, uid: Uid) -> EngineResult<()> {
        if self.uids.insert(uid) {
            Ok(())
        } else {
            Err(EngineError::duplicate(format!("uid {}", uid)))
        }
    }

    pub fn remove(&self, _section: &Exclusive<'_>, uid: Uid) -> EngineResult<()> {
        self.uids
            .remove(&uid)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(format!("uid {}", uid)))
    }

    pub fn clear(&self, _section: &Exclusive<'_>) -> usize {
        let count = self.uids.len();
        self.uids.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}
