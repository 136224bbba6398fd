//! Reconnect delay policy.
//!
//! Two policies share one interface: exponential backoff with a ceiling
//! (the default) and a flat interval with a smaller attempt budget. Both
//! stop at `max_attempts`; the failure threshold is enforced separately by
//! the connection core, so either policy ends in the same permanent-failure
//! state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait before the next automatic reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// `min(base_delay_ms * 2^attempt, max_delay_ms)`
    Exponential {
        #[serde(default = "default_base_delay_ms")]
        base_delay_ms: u64,
        #[serde(default = "default_max_delay_ms")]
        max_delay_ms: u64,
        #[serde(default = "default_exponential_attempts")]
        max_attempts: u32,
    },
    /// Same delay every time.
    Fixed {
        #[serde(default = "default_fixed_delay_ms")]
        delay_ms: u64,
        #[serde(default = "default_fixed_attempts")]
        max_attempts: u32,
    },
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_exponential_attempts() -> u32 {
    5
}

fn default_fixed_delay_ms() -> u64 {
    3000
}

fn default_fixed_attempts() -> u32 {
    3
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl ReconnectPolicy {
    /// 1 s base, 30 s ceiling, 5 attempts.
    pub fn exponential() -> Self {
        Self::Exponential {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_exponential_attempts(),
        }
    }

    /// 3 s flat, 3 attempts.
    pub fn fixed() -> Self {
        Self::Fixed {
            delay_ms: default_fixed_delay_ms(),
            max_attempts: default_fixed_attempts(),
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match *self {
            Self::Exponential {
                base_delay_ms,
                max_delay_ms,
                ..
            } => std::cmp::min(
                base_delay_ms.saturating_mul(2u64.saturating_pow(attempt)),
                max_delay_ms,
            ),
            Self::Fixed { delay_ms, .. } => delay_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn max_attempts(&self) -> u32 {
        match *self {
            Self::Exponential { max_attempts, .. } | Self::Fixed { max_attempts, .. } => {
                max_attempts
            },
        }
    }

    /// `true` once `attempts` retries have already been scheduled and no more are allowed.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts()
    }
}
