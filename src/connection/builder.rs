use std::sync::Arc;

use super::manager::{ConnectionManager, TaskConfig};
use super::websocket;
use crate::dispatcher::Dispatcher;
use crate::error::{CircleLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::failure_store::{ArcFailureStore, FailureStore, MemoryFailureStore};
use crate::models::ConnectionOptions;
use crate::session::{ArcSessionAdapter, SessionAdapter, StaticSession};
use crate::timeouts::CircleLinkTimeouts;

/// Builder for configuring [`ConnectionManager`] instances.
pub struct ConnectionManagerBuilder {
    base_url: Option<String>,
    session: Option<ArcSessionAdapter>,
    failure_store: Option<ArcFailureStore>,
    options: ConnectionOptions,
    timeouts: CircleLinkTimeouts,
    event_handlers: EventHandlers,
    dispatcher: Option<Dispatcher>,
}

impl Default for ConnectionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManagerBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            session: None,
            failure_store: None,
            options: ConnectionOptions::default(),
            timeouts: CircleLinkTimeouts::default(),
            event_handlers: EventHandlers::default(),
            dispatcher: None,
        }
    }

    /// Backend base URL, e.g. `https://api.circle.example`. Required.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Where the auth token comes from. Required.
    pub fn session(mut self, session: impl SessionAdapter) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    /// Share an adapter that is already behind an `Arc`.
    pub fn session_arc(mut self, session: ArcSessionAdapter) -> Self {
        self.session = Some(session);
        self
    }

    /// Shorthand for `session(StaticSession::new(token))`.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.session(StaticSession::new(token))
    }

    /// Failure counter storage. Default: in-memory, lost on restart.
    pub fn failure_store(mut self, store: impl FailureStore) -> Self {
        self.failure_store = Some(Arc::new(store));
        self
    }

    pub fn failure_store_arc(mut self, store: ArcFailureStore) -> Self {
        self.failure_store = Some(store);
        self
    }

    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeouts(mut self, timeouts: CircleLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Use an existing dispatcher instead of a fresh one.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate the configuration and spawn the connection task.
    ///
    /// Must be called from within a tokio runtime. Does not connect; call
    /// [`ConnectionManager::connect`].
    pub fn build(self) -> Result<ConnectionManager> {
        let base_url = self
            .base_url
            .ok_or_else(|| CircleLinkError::ConfigurationError("base_url is required".into()))?;
        let base_url = websocket::parse_base_url(&base_url)?;
        let session = self.session.ok_or_else(|| {
            CircleLinkError::ConfigurationError("a session adapter is required".into())
        })?;

        tokio::runtime::Handle::try_current().map_err(|_| {
            CircleLinkError::ConfigurationError(
                "ConnectionManager must be built inside a tokio runtime".into(),
            )
        })?;

        let store = self
            .failure_store
            .unwrap_or_else(|| Arc::new(MemoryFailureStore::new()));

        log::debug!(
            "[circle-link] Building connection manager for {} (policy: {:?}, threshold: {})",
            base_url,
            self.options.reconnect_policy,
            self.options.failure_threshold
        );

        Ok(ConnectionManager::spawn(TaskConfig {
            base_url,
            session,
            store,
            options: self.options,
            timeouts: self.timeouts,
            event_handlers: self.event_handlers,
            dispatcher: self.dispatcher.unwrap_or_default(),
        }))
    }
}
