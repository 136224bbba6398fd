//! Single-attempt guard for connection attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag held from `Connecting` until authentication succeeds, fails, or is
/// rejected. While held, further connect requests are no-ops.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLock {
    held: Arc<AtomicBool>,
}

impl ConnectionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` if another attempt holds it.
    pub fn try_acquire(&self) -> Option<ConnectionLockGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConnectionLockGuard {
                held: self.held.clone(),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the [`ConnectionLock`] when dropped.
#[derive(Debug)]
pub struct ConnectionLockGuard {
    held: Arc<AtomicBool>,
}

impl Drop for ConnectionLockGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
