//! Connection state machine without IO.
//!
//! [`ConnectionCore`] owns the lifecycle state, the connection lock guard,
//! and the failure-episode bookkeeping. Every transition is a method that
//! returns what the caller (the connection task) must do next: open a
//! socket, schedule a reconnect, publish a notice. Nothing here touches the
//! network or the clock, so the rules are tested directly.

use std::time::Duration;
use tokio::sync::watch;

use super::lock::{ConnectionLock, ConnectionLockGuard};
use crate::error::Result;
use crate::failure_store::ArcFailureStore;
use crate::models::{ConnectionOptions, ConnectionState, ConnectivityNotice, FailureCounters};

/// Result of a connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnectDecision {
    /// Lock taken, state is `Connecting`; open a socket with this token.
    Proceed(String),
    /// No session token; nothing to do.
    NoToken,
    /// Another attempt holds the lock.
    Locked,
    AlreadyConnected,
    /// Failure threshold reached; only a manual retry helps.
    PermanentlyFailed { notice: Option<ConnectivityNotice> },
}

/// What to do after a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    /// Call `connect()` again after `delay`. `attempt` is 0-indexed.
    Reconnect { delay: Duration, attempt: u32 },
    /// Auto-reconnect disabled; stay idle.
    Idle,
    PermanentlyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FailureStep {
    pub outcome: FailureOutcome,
    pub notice: Option<ConnectivityNotice>,
    pub counters: FailureCounters,
}

/// Notices already sent during the current failure episode.
#[derive(Debug, Default, Clone, Copy)]
struct Episode {
    in_progress: bool,
    reconnecting_notified: bool,
    terminal_notified: bool,
}

pub(crate) struct ConnectionCore {
    state: watch::Sender<ConnectionState>,
    options: ConnectionOptions,
    store: ArcFailureStore,
    lock: ConnectionLock,
    guard: Option<ConnectionLockGuard>,
    episode: Episode,
}

impl ConnectionCore {
    pub fn new(
        options: ConnectionOptions,
        store: ArcFailureStore,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            state,
            options,
            store,
            lock: ConnectionLock::new(),
            guard: None,
            episode: Episode::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn counters(&self) -> FailureCounters {
        match self.store.load() {
            Ok(counters) => counters,
            Err(e) => {
                log::warn!("[circle-link] Failed to load failure counters: {}", e);
                FailureCounters::default()
            },
        }
    }

    pub fn is_lock_held(&self) -> bool {
        self.lock.is_held()
    }

    fn set_state(&mut self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            log::debug!("[circle-link] State {} -> {}", prev, next);
        }
    }

    /// Apply a counter update. A store error is logged; the connection keeps
    /// going on whatever the store reports afterwards.
    fn record(
        &self,
        what: &str,
        op: impl FnOnce(&ArcFailureStore) -> Result<FailureCounters>,
    ) -> FailureCounters {
        match op(&self.store) {
            Ok(counters) => counters,
            Err(e) => {
                log::warn!("[circle-link] Failed to {} in failure store: {}", what, e);
                self.counters()
            },
        }
    }

    fn release_lock(&mut self) {
        self.guard = None;
    }

    fn threshold_reached(&self, counters: &FailureCounters) -> bool {
        counters.consecutive_failures >= self.options.failure_threshold
    }

    fn terminal_notice(&mut self, notice: ConnectivityNotice) -> Option<ConnectivityNotice> {
        if self.episode.terminal_notified {
            None
        } else {
            self.episode.terminal_notified = true;
            Some(notice)
        }
    }

    fn unavailable_notice(&mut self, counters: &FailureCounters) -> Option<ConnectivityNotice> {
        self.terminal_notice(ConnectivityNotice::Unavailable {
            reason: format!(
                "{} consecutive connection failures",
                counters.consecutive_failures
            ),
        })
    }

    /// Idle → Connecting.
    pub fn begin_connect(&mut self, token: Option<String>) -> ConnectDecision {
        if self.state() == ConnectionState::Authenticated {
            return ConnectDecision::AlreadyConnected;
        }

        // No token: a no-op, even with persisted failures.
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return ConnectDecision::NoToken;
        };

        let counters = self.counters();
        if self.state() == ConnectionState::PermanentlyFailed || self.threshold_reached(&counters) {
            self.set_state(ConnectionState::PermanentlyFailed);
            self.episode.in_progress = true;
            let notice = self.unavailable_notice(&counters);
            return ConnectDecision::PermanentlyFailed { notice };
        }

        match self.lock.try_acquire() {
            Some(guard) => {
                self.guard = Some(guard);
                self.set_state(ConnectionState::Connecting);
                ConnectDecision::Proceed(token)
            },
            None => ConnectDecision::Locked,
        }
    }

    /// An attempt ended before the transport was involved (bad URL).
    pub fn abort_attempt(&mut self) {
        self.release_lock();
        self.set_state(ConnectionState::Idle);
    }

    /// Connecting → AwaitingAuth.
    pub fn on_transport_open(&mut self) {
        self.set_state(ConnectionState::AwaitingAuth);
    }

    /// AwaitingAuth → Authenticated. Returns the "reconnected" notice when a
    /// failure episode just ended.
    pub fn on_auth_success(&mut self) -> Option<ConnectivityNotice> {
        self.release_lock();
        self.record("reset counters", |s| s.reset());
        self.set_state(ConnectionState::Authenticated);
        let was_failing = self.episode.in_progress;
        self.episode = Episode::default();
        was_failing.then_some(ConnectivityNotice::Reconnected)
    }

    /// AwaitingAuth → Idle. Never schedules a reconnect.
    pub fn on_auth_rejected(&mut self, reason: &str) -> ConnectivityNotice {
        self.release_lock();
        self.set_state(ConnectionState::Idle);
        ConnectivityNotice::AuthRejected {
            reason: reason.to_string(),
        }
    }

    /// Connect/auth timeout, failed open, or a non-1000 close.
    pub fn on_hard_failure(&mut self) -> FailureStep {
        self.release_lock();
        self.episode.in_progress = true;
        let counters = self.record("record failure", |s| s.record_failure());

        if self.threshold_reached(&counters) {
            self.set_state(ConnectionState::PermanentlyFailed);
            let notice = self.unavailable_notice(&counters);
            return FailureStep {
                outcome: FailureOutcome::PermanentlyFailed,
                notice,
                counters,
            };
        }

        if !self.options.auto_reconnect {
            self.set_state(ConnectionState::Idle);
            return FailureStep {
                outcome: FailureOutcome::Idle,
                notice: None,
                counters,
            };
        }

        let policy = self.options.reconnect_policy;
        if policy.is_exhausted(counters.reconnect_attempts) {
            self.set_state(ConnectionState::PermanentlyFailed);
            let notice = self.terminal_notice(ConnectivityNotice::RetriesExhausted {
                attempts: counters.reconnect_attempts,
            });
            return FailureStep {
                outcome: FailureOutcome::PermanentlyFailed,
                notice,
                counters,
            };
        }

        let attempt = counters.reconnect_attempts;
        let delay = policy.delay_for(attempt);
        let counters = self.record("record reconnect attempt", |s| s.record_attempt());
        self.set_state(ConnectionState::Idle);

        let notice = if self.episode.reconnecting_notified {
            None
        } else {
            self.episode.reconnecting_notified = true;
            Some(ConnectivityNotice::Reconnecting { attempt, delay })
        };

        FailureStep {
            outcome: FailureOutcome::Reconnect { delay, attempt },
            notice,
            counters,
        }
    }

    /// Close with code 1000: no retry, attempts back to zero.
    pub fn on_clean_close(&mut self) {
        self.release_lock();
        self.record("reset reconnect attempts", |s| s.reset_attempts());
        self.set_state(ConnectionState::Idle);
    }

    /// Caller-initiated disconnect. A permanent failure stays permanent.
    pub fn on_disconnect(&mut self) {
        self.release_lock();
        self.record("reset reconnect attempts", |s| s.reset_attempts());
        if self.state() != ConnectionState::PermanentlyFailed {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Mark a close the caller started.
    pub fn begin_closing(&mut self) {
        self.set_state(ConnectionState::Closing);
    }

    /// A parked socket is reused: back to Authenticated without a handshake.
    pub fn adopt_parked(&mut self) {
        self.set_state(ConnectionState::Authenticated);
    }

    /// Manual retry: counters cleared, permanent failure lifted, new episode.
    pub fn retry(&mut self) {
        self.record("reset counters", |s| s.reset());
        self.episode = Episode::default();
        if self.state() == ConnectionState::PermanentlyFailed {
            self.set_state(ConnectionState::Idle);
        }
    }

    pub fn shutdown(&mut self) {
        self.release_lock();
        self.set_state(ConnectionState::Idle);
    }
}
