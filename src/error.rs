//! Error types for circle-link.
//!
//! The first six variants are the transport failure taxonomy. Most of them
//! never reach callers: timeouts and abnormal closes are recovered by the
//! reconnect loop, malformed frames and handler panics are logged and
//! dropped. They still exist as values so that `on_error` hooks and logs
//! carry a typed cause.

use thiserror::Error;

/// Errors produced by the real-time transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircleLinkError {
    /// The transport did not open (or authenticate) before its deadline.
    #[error("Connection attempt timed out: {0}")]
    ConnectTimeout(String),

    /// The socket closed with a code other than 1000.
    #[error("Connection closed abnormally (code: {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    /// The server answered the handshake with `authentication_error`.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// A live transmit failed; the message was put back at the front of the queue.
    #[error("Send failed, message re-queued: {0}")]
    SendFailure(String),

    /// An inbound frame was not a valid `{type, payload}` object.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A subscriber callback panicked.
    #[error("Subscriber handler failed for '{kind}': {message}")]
    HandlerError { kind: String, message: String },

    /// Not authenticated; the message was queued for delivery after connect.
    #[error("Not connected, message queued for delivery")]
    NotConnected,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Failure store error: {0}")]
    StorageError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The background connection task is gone.
    #[error("Connection manager has shut down")]
    Shutdown,
}

impl CircleLinkError {
    /// Whether the reconnect loop may recover from this error on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_)
                | Self::AbnormalClose { .. }
                | Self::SendFailure(_)
                | Self::NotConnected
                | Self::WebSocketError(_)
        )
    }

    /// Whether a send that returned this error left the message in the outbound queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::SendFailure(_) | Self::NotConnected)
    }
}

impl From<serde_json::Error> for CircleLinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedMessage(e.to_string())
    }
}

impl From<std::io::Error> for CircleLinkError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

/// Result type for circle-link operations.
pub type Result<T> = std::result::Result<T, CircleLinkError>;
