//! WebSocket connection management.
//!
//! This module contains:
//! - [`manager`]: the public [`ConnectionManager`] handle and its background task
//! - [`builder`]: [`ConnectionManagerBuilder`]
//! - `lifecycle`: the IO-free state machine (failure counting, backoff, notices)
//! - `lock`: the single-attempt connection lock
//! - `websocket`: URL derivation, frame decoding and writes

pub mod builder;
pub(crate) mod lifecycle;
pub(crate) mod lock;
pub mod manager;
pub(crate) mod websocket;

pub use builder::ConnectionManagerBuilder;
pub use lock::{ConnectionLock, ConnectionLockGuard};
pub use manager::ConnectionManager;
