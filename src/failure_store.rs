//! Durable failure counters.
//!
//! The connection core keeps its failure history in a [`FailureStore`] so a
//! restarted process still knows it was failing. Backends only implement
//! [`load`](FailureStore::load) and an atomic read-modify-write
//! [`update`](FailureStore::update); the counter operations are built on
//! top of those two.
//!
//! - [`MemoryFailureStore`]: process-local, for tests and ephemeral sessions
//! - [`FileFailureStore`]: TOML file on disk, survives restarts

mod file;

pub use file::FileFailureStore;

use crate::error::Result;
use crate::models::FailureCounters;
use parking_lot::Mutex;
use std::sync::Arc;

/// Storage backend for [`FailureCounters`].
///
/// `update` must apply the closure and persist the result as one step with
/// respect to every other call on the same store.
pub trait FailureStore: Send + Sync + 'static {
    /// Current counters.
    fn load(&self) -> Result<FailureCounters>;

    /// Apply `f` to the counters and persist. Returns the new value.
    fn update(&self, f: &mut dyn FnMut(&mut FailureCounters)) -> Result<FailureCounters>;

    /// `consecutive_failures += 1`
    fn record_failure(&self) -> Result<FailureCounters> {
        self.update(&mut |c| c.consecutive_failures = c.consecutive_failures.saturating_add(1))
    }

    /// `reconnect_attempts += 1`
    fn record_attempt(&self) -> Result<FailureCounters> {
        self.update(&mut |c| c.reconnect_attempts = c.reconnect_attempts.saturating_add(1))
    }

    /// `reconnect_attempts = 0`, failures untouched.
    fn reset_attempts(&self) -> Result<FailureCounters> {
        self.update(&mut |c| c.reconnect_attempts = 0)
    }

    /// Both counters back to zero.
    fn reset(&self) -> Result<FailureCounters> {
        self.update(&mut |c| *c = FailureCounters::default())
    }
}

/// A shared, type-erased [`FailureStore`].
pub type ArcFailureStore = Arc<dyn FailureStore>;

/// In-memory failure store.
///
/// Does NOT persist across restarts. Share one instance between managers
/// (via `Arc`) to simulate a reload in tests.
#[derive(Debug, Default)]
pub struct MemoryFailureStore {
    counters: Mutex<FailureCounters>,
}

impl MemoryFailureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing counters.
    pub fn with_counters(counters: FailureCounters) -> Self {
        Self {
            counters: Mutex::new(counters),
        }
    }
}

impl FailureStore for MemoryFailureStore {
    fn load(&self) -> Result<FailureCounters> {
        Ok(*self.counters.lock())
    }

    fn update(&self, f: &mut dyn FnMut(&mut FailureCounters)) -> Result<FailureCounters> {
        let mut guard = self.counters.lock();
        f(&mut guard);
        Ok(*guard)
    }
}
