use serde::{Deserialize, Serialize};

/// Durable failure history shared across manager instances and restarts.
///
/// `consecutive_failures` counts hard failures (timeouts, abnormal closes).
/// `reconnect_attempts` counts scheduled delayed retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureCounters {
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub reconnect_attempts: u32,
}

impl FailureCounters {
    pub fn is_clear(&self) -> bool {
        self.consecutive_failures == 0 && self.reconnect_attempts == 0
    }
}
