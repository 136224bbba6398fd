//! Connection lifecycle event handlers.
//!
//! Provides callback-based hooks for monitoring the transport:
//!
//! - [`on_connect`](EventHandlers::on_connect): Fired when the connection is authenticated
//! - [`on_disconnect`](EventHandlers::on_disconnect): Fired when an authenticated connection closes
//! - [`on_error`](EventHandlers::on_error): Fired on connection, protocol or handler errors
//! - [`on_notice`](EventHandlers::on_notice): Fired for user-facing connectivity notices
//! - [`on_receive`](EventHandlers::on_receive): Optional debug hook for all incoming frames
//! - [`on_send`](EventHandlers::on_send): Optional debug hook for all outgoing frames
//!
//! # Example
//!
//! ```rust
//! use circle_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("Live updates on"))
//!     .on_disconnect(|reason| println!("Disconnected: {}", reason))
//!     .on_notice(|notice| println!("[toast] {}", notice));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::CircleLinkError;
use crate::models::{CloseCode, ConnectivityNotice};

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if one was received.
    pub code: Option<CloseCode>,
}

impl DisconnectReason {
    /// Create a new disconnect reason with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new disconnect reason with a message and close code.
    pub fn with_code(message: impl Into<String>, code: CloseCode) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub error: CircleLinkError,
}

impl ConnectionError {
    pub fn new(error: CircleLinkError) -> Self {
        Self { error }
    }

    /// Whether the reconnect loop may still recover.
    pub fn recoverable(&self) -> bool {
        self.error.is_recoverable()
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
pub type OnNoticeCallback = Arc<dyn Fn(ConnectivityNotice) + Send + Sync>;
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. They run on the connection task, so they
/// should return quickly; hand heavy work off to another task.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_notice: Option<OnNoticeCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_notice", &self.on_notice.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the connection becomes authenticated.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when an authenticated connection closes.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when an error occurs.
    ///
    /// The callback receives a [`ConnectionError`] indicating whether the
    /// error is recoverable (auto-reconnect may help) or needs the caller.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for each user-facing connectivity notice.
    pub fn on_notice(mut self, f: impl Fn(ConnectivityNotice) + Send + Sync + 'static) -> Self {
        self.on_notice = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every raw frame received from the server.
    ///
    /// This is a **debug/tracing hook**. Not needed for normal operation.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every raw frame sent to the server.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_notice.is_some()
            || self.on_receive.is_some()
            || self.on_send.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: CircleLinkError) {
        if let Some(cb) = &self.on_error {
            cb(ConnectionError::new(error));
        }
    }

    pub(crate) fn emit_notice(&self, notice: ConnectivityNotice) {
        if let Some(cb) = &self.on_notice {
            cb(notice);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}
