use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// User-facing connectivity change, emitted at most once per transition.
///
/// Presentation (toast, banner, nothing) is up to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum ConnectivityNotice {
    /// First delayed retry of a failure episode was scheduled.
    Reconnecting {
        attempt: u32,
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Authenticated again after a failure episode.
    Reconnected,
    /// Hard-failure threshold crossed; automatic retries suppressed.
    Unavailable { reason: String },
    /// Reconnect attempt budget used up.
    RetriesExhausted { attempts: u32 },
    /// Server rejected the token; a new token and a manual retry are needed.
    AuthRejected { reason: String },
}

impl ConnectivityNotice {
    /// `true` for notices that mean the connection needs user action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::RetriesExhausted { .. } | Self::AuthRejected { .. }
        )
    }
}

impl fmt::Display for ConnectivityNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting { attempt, delay } => {
                write!(f, "Connection lost, reconnecting in {:?} (attempt {})", delay, attempt + 1)
            },
            Self::Reconnected => write!(f, "Reconnected"),
            Self::Unavailable { reason } => write!(f, "Real-time connection unavailable: {}", reason),
            Self::RetriesExhausted { attempts } => {
                write!(f, "Gave up reconnecting after {} attempts", attempts)
            },
            Self::AuthRejected { reason } => write!(f, "Session rejected by server: {}", reason),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
