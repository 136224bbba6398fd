//! # circle-link
//!
//! Real-time transport client for the circle support-group platform.
//!
//! One [`ConnectionManager`] keeps a single authenticated WebSocket to the
//! backend and fans typed JSON events out to any number of consumers:
//!
//! - **Authentication**: the session token travels in the handshake target
//!   (`?token=`); the connection is usable only after `authentication_success`
//! - **Resilience**: exponential (or fixed) backoff, a hard-failure threshold,
//!   and failure counters that survive restarts ([`FileFailureStore`])
//! - **Outbound queue**: messages sent while offline are delivered in order
//!   once authenticated
//! - **Pub/sub**: [`Dispatcher`] routes inbound messages by `type` to callbacks
//!   or channels; dropping a [`SubscriptionHandle`] unsubscribes
//! - **Notices**: [`ConnectivityNotice`] values for reconnecting, recovery and
//!   give-up transitions, each emitted once per failure episode
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use circle_link::{ConnectionManager, ConnectivityNotice, Message, SharedSession};
//! use serde_json::json;
//!
//! # async fn example() -> circle_link::Result<()> {
//! let session = SharedSession::new();
//! let manager = ConnectionManager::builder()
//!     .base_url("https://api.circle.example")
//!     .session(session.clone())
//!     .build()?;
//!
//! let meetings = manager.subscribe("meeting_updated", |msg: &Message| {
//!     println!("meeting changed: {}", msg.payload());
//! });
//!
//! let mut notices = manager.notices();
//! tokio::spawn(async move {
//!     while let Ok(notice) = notices.recv().await {
//!         if let ConnectivityNotice::Unavailable { .. } = notice {
//!             eprintln!("{}", notice);
//!         }
//!     }
//! });
//!
//! // Signing in connects; signing out disconnects.
//! session.set_token("eyJhbGc...");
//!
//! let _ = manager.send_message("chat_message", json!({ "text": "hello" })).await;
//!
//! meetings.unsubscribe();
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`LinkConfig`] reads `<config_dir>/circle-link/config.toml` with
//! `CIRCLE_LINK_*` environment overrides and produces a pre-filled
//! [`ConnectionManagerBuilder`].

pub mod backoff;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event_handlers;
pub mod failure_store;
pub mod models;
pub mod outbound_queue;
pub mod session;
pub mod timeouts;

pub use backoff::ReconnectPolicy;
pub use config::LinkConfig;
pub use connection::{ConnectionLock, ConnectionLockGuard, ConnectionManager, ConnectionManagerBuilder};
pub use dispatcher::{DispatchReport, Dispatcher, MessageHandler, SubscriptionHandle};
pub use error::{CircleLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use failure_store::{ArcFailureStore, FailureStore, FileFailureStore, MemoryFailureStore};
pub use models::{
    CloseCode, ConnectionOptions, ConnectionState, ConnectivityNotice, FailureCounters, Message,
    AUTHENTICATION_ERROR, AUTHENTICATION_SUCCESS,
};
pub use outbound_queue::OutboundQueue;
pub use session::{ArcSessionAdapter, SessionAdapter, SharedSession, StaticSession};
pub use timeouts::{CircleLinkTimeouts, CircleLinkTimeoutsBuilder};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
