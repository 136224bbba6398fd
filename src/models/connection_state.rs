use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the single connection owned by a
/// [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket, nothing in flight.
    #[default]
    Idle,
    /// Transport handshake in progress, connect deadline armed.
    Connecting,
    /// Socket open, waiting for `authentication_success`.
    AwaitingAuth,
    /// Authenticated and usable. The only state where `is_connected()` holds.
    Authenticated,
    /// A caller-initiated close is in progress.
    Closing,
    /// Failure threshold crossed; only a manual retry leaves this state.
    PermanentlyFailed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// `true` while an attempt holds the connection lock.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingAuth)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
            Self::PermanentlyFailed => "permanently_failed",
        };
        f.write_str(name)
    }
}
