//! Session adapter: where the connection gets its auth token.
//!
//! The connection task asks the adapter for a token on every connect and
//! reconnect. An adapter that can also *announce* token changes returns a
//! [`watch::Receiver`] from [`SessionAdapter::watch`]; the connection task
//! then reacts on its own:
//!
//! - token removed: forced disconnect
//! - token appears: `connect()`
//! - token replaced while connected: clean close, reconnect with the new token
//!
//! ```rust,no_run
//! use circle_link::{SessionAdapter, SharedSession};
//!
//! # async fn demo() {
//! let session = SharedSession::new();
//! session.set_token("eyJhbGc...");
//! assert_eq!(session.token().await.as_deref(), Some("eyJhbGc..."));
//! session.clear_token();
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// Supplies the current session token.
#[async_trait::async_trait]
pub trait SessionAdapter: Send + Sync + 'static {
    /// Current token, or `None` when signed out.
    async fn token(&self) -> Option<String>;

    /// Change feed for the token. `None` means the adapter never changes
    /// on its own and the caller drives `connect()` / `disconnect()`.
    fn watch(&self) -> Option<watch::Receiver<Option<String>>> {
        None
    }
}

/// A shared, type-erased [`SessionAdapter`].
pub type ArcSessionAdapter = Arc<dyn SessionAdapter>;

/// Fixed token set at construction time.
#[derive(Clone)]
pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A session with no token; `connect()` is then a logged no-op.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait::async_trait]
impl SessionAdapter for StaticSession {
    async fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Mutable session backed by a `watch` channel.
///
/// Clones share the same token. Sign-in and sign-out code calls
/// [`set_token`](Self::set_token) / [`clear_token`](Self::clear_token) and
/// every connection using this session follows.
#[derive(Clone)]
pub struct SharedSession {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for SharedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSession {
    /// Signed-out session.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(token);
        session
    }

    /// Replace the token. Setting the same value again is not a change.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                false
            } else {
                *current = Some(token);
                true
            }
        });
    }

    /// Sign out.
    pub fn clear_token(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}

impl std::fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSession")
            .field("signed_in", &self.tx.borrow().is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl SessionAdapter for SharedSession {
    async fn token(&self) -> Option<String> {
        self.current()
    }

    fn watch(&self) -> Option<watch::Receiver<Option<String>>> {
        Some(self.tx.subscribe())
    }
}
