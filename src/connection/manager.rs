//! Connection manager handle and its background task.
//!
//! One tokio task per manager owns the socket, the state machine, the
//! outbound queue and every timer. The public handle talks to it over an
//! unbounded command channel:
//!
//! - `connect()`, `disconnect()`, `retry_connection()` enqueue and return
//! - `send_message()` awaits the task's verdict on a oneshot
//! - state is published on a `watch` channel, read without a round trip

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use url::Url;

use super::builder::ConnectionManagerBuilder;
use super::lifecycle::{ConnectDecision, ConnectionCore, FailureOutcome};
use super::websocket::{self, Inbound, WebSocketStream};
use crate::dispatcher::{Dispatcher, SubscriptionHandle};
use crate::error::{CircleLinkError, Result};
use crate::event_handlers::{DisconnectReason, EventHandlers};
use crate::failure_store::ArcFailureStore;
use crate::models::{
    CloseCode, ConnectionOptions, ConnectionState, ConnectivityNotice, FailureCounters, Message,
    AUTHENTICATION_ERROR, AUTHENTICATION_SUCCESS,
};
use crate::outbound_queue::OutboundQueue;
use crate::session::ArcSessionAdapter;
use crate::timeouts::CircleLinkTimeouts;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
enum ConnCmd {
    Connect,
    Disconnect { force: bool },
    Retry,
    Send {
        message: Message,
        result_tx: oneshot::Sender<Result<()>>,
    },
    QueueLen { result_tx: oneshot::Sender<usize> },
    Shutdown { done_tx: Option<oneshot::Sender<()>> },
}

// ── ConnectionManager (public handle) ───────────────────────────────────────

/// Owner of the single authenticated WebSocket.
///
/// Create one with [`ConnectionManager::builder`] inside a tokio runtime.
/// Dropping the manager shuts the connection down.
///
/// ```rust,no_run
/// use circle_link::{ConnectionManager, Message, StaticSession};
/// use serde_json::json;
///
/// # async fn example() -> circle_link::Result<()> {
/// let manager = ConnectionManager::builder()
///     .base_url("https://api.circle.example")
///     .session(StaticSession::new("eyJhbGc..."))
///     .build()?;
///
/// manager
///     .subscribe("meeting_updated", |msg: &Message| println!("{}", msg.payload()))
///     .detach();
/// manager.connect();
///
/// // Queued until authenticated, then delivered in order.
/// let _ = manager.send_message("chat_message", json!({ "text": "hi" })).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    state_rx: watch::Receiver<ConnectionState>,
    store: ArcFailureStore,
    dispatcher: Dispatcher,
    foreground: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("foreground", &self.is_foreground())
            .finish()
    }
}

/// Everything the background task needs, assembled by the builder.
pub(crate) struct TaskConfig {
    pub base_url: Url,
    pub session: ArcSessionAdapter,
    pub store: ArcFailureStore,
    pub options: ConnectionOptions,
    pub timeouts: CircleLinkTimeouts,
    pub event_handlers: EventHandlers,
    pub dispatcher: Dispatcher,
}

impl ConnectionManager {
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    /// Spawn the connection task. Must run inside a tokio runtime.
    pub(crate) fn spawn(config: TaskConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let foreground = Arc::new(AtomicBool::new(true));

        let store = config.store.clone();
        let dispatcher = config.dispatcher.clone();
        let task = ConnectionTask::new(config, cmd_rx, state_tx, foreground.clone());
        let handle = tokio::spawn(task.run());

        Self {
            cmd_tx,
            state_rx,
            store,
            dispatcher,
            foreground,
            task: Mutex::new(Some(handle)),
        }
    }

    fn send_cmd(&self, cmd: ConnCmd) {
        if self.cmd_tx.send(cmd).is_err() {
            log::debug!("[circle-link] Command dropped: connection task has shut down");
        }
    }

    /// Start connecting if a token is available and nothing is in flight.
    ///
    /// Returns immediately. Re-adopts a parked socket without a new handshake.
    pub fn connect(&self) {
        self.send_cmd(ConnCmd::Connect);
    }

    /// Stop the connection and cancel pending timers.
    ///
    /// Without `force`, while foregrounded, an authenticated socket is kept
    /// open (parked) for the next `connect()`.
    pub fn disconnect(&self, force: bool) {
        self.send_cmd(ConnCmd::Disconnect { force });
    }

    /// Clear the failure history and connect now. The only way out of
    /// [`ConnectionState::PermanentlyFailed`].
    pub fn retry_connection(&self) {
        self.send_cmd(ConnCmd::Retry);
    }

    /// Send a typed message.
    ///
    /// - `Ok(())`: transmitted.
    /// - `Err(NotConnected)`: queued, delivered after authentication.
    /// - `Err(SendFailure)`: transmit failed, re-queued at the front.
    /// - `Err(Shutdown)`: the manager is gone; the message is lost.
    pub async fn send_message(&self, kind: impl Into<String>, payload: JsonValue) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Send {
                message: Message::new(kind, payload),
                result_tx,
            })
            .map_err(|_| CircleLinkError::Shutdown)?;
        result_rx.await.map_err(|_| CircleLinkError::Shutdown)?
    }

    /// Messages waiting in the outbound queue. `0` once the manager is shut down.
    pub async fn queued_messages(&self) -> usize {
        let (result_tx, result_rx) = oneshot::channel();
        if self.cmd_tx.send(ConnCmd::QueueLen { result_tx }).is_err() {
            return 0;
        }
        result_rx.await.unwrap_or(0)
    }

    /// `true` only while authenticated.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn failure_counters(&self) -> Result<FailureCounters> {
        self.store.load()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Shorthand for `dispatcher().subscribe(..)`.
    pub fn subscribe(
        &self,
        kind: impl Into<String>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.dispatcher.subscribe(kind, handler)
    }

    /// Shorthand for `dispatcher().subscribe_to_all(..)`.
    pub fn subscribe_to_all(
        &self,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.dispatcher.subscribe_to_all(handler)
    }

    pub fn notices(&self) -> broadcast::Receiver<ConnectivityNotice> {
        self.dispatcher.notices()
    }

    /// Whether the host context is visible. Controls socket parking on
    /// non-forced disconnects. Default: `true`.
    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::Release);
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::Acquire)
    }

    /// Close the socket, stop the task, and wait for it to finish.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::Shutdown {
                done_tx: Some(done_tx),
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(ConnCmd::Shutdown { done_tx: None });
    }
}

// ── Background connection task ──────────────────────────────────────────────

type PendingOpen = Pin<Box<dyn Future<Output = Result<WebSocketStream>> + Send>>;

#[derive(Debug, Clone, Copy)]
struct ScheduledReconnect {
    at: TokioInstant,
    generation: u64,
}

enum Flow {
    Continue,
    Stop,
}

struct ConnectionTask {
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    base_url: Url,
    session: ArcSessionAdapter,
    options: ConnectionOptions,
    timeouts: CircleLinkTimeouts,
    handlers: EventHandlers,
    dispatcher: Dispatcher,
    foreground: Arc<AtomicBool>,
    core: ConnectionCore,
    queue: OutboundQueue,

    /// Socket in AwaitingAuth or Authenticated.
    ws: Option<WebSocketStream>,
    /// Authenticated socket kept open after a non-forced disconnect.
    parked: Option<WebSocketStream>,
    pending_open: Option<PendingOpen>,
    token_rx: Option<watch::Receiver<Option<String>>>,
    /// Token the current socket was opened with.
    active_token: Option<String>,

    connect_deadline: Option<TokioInstant>,
    auth_deadline: Option<TokioInstant>,
    keepalive_deadline: Option<TokioInstant>,
    pong_deadline: Option<TokioInstant>,
    reconnect: Option<ScheduledReconnect>,
    reconnect_generation: u64,
}

async fn sleep_until_opt(deadline: Option<TokioInstant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    ws: &mut Option<WebSocketStream>,
) -> Option<std::result::Result<WsMessage, WsError>> {
    match ws {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn poll_open(pending: &mut Option<PendingOpen>) -> Result<WebSocketStream> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// `None` once the session side is gone.
async fn token_changed(
    rx: &mut Option<watch::Receiver<Option<String>>>,
) -> Option<Option<String>> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

impl ConnectionTask {
    fn new(
        config: TaskConfig,
        cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
        state_tx: watch::Sender<ConnectionState>,
        foreground: Arc<AtomicBool>,
    ) -> Self {
        let mut token_rx = config.session.watch();
        if let Some(rx) = token_rx.as_mut() {
            // The current value is not a change.
            rx.borrow_and_update();
        }

        Self {
            cmd_rx,
            base_url: config.base_url,
            session: config.session,
            core: ConnectionCore::new(config.options.clone(), config.store, state_tx),
            options: config.options,
            timeouts: config.timeouts,
            handlers: config.event_handlers,
            dispatcher: config.dispatcher,
            foreground,
            queue: OutboundQueue::new(),
            ws: None,
            parked: None,
            pending_open: None,
            token_rx,
            active_token: None,
            connect_deadline: None,
            auth_deadline: None,
            keepalive_deadline: None,
            pong_deadline: None,
            reconnect: None,
            reconnect_generation: 0,
        }
    }

    async fn run(mut self) {
        log::debug!("[circle-link] Connection task started for {}", self.base_url);
        loop {
            let connect_deadline = self.connect_deadline;
            let auth_deadline = self.auth_deadline;
            let keepalive_deadline = self.keepalive_deadline;
            let pong_deadline = self.pong_deadline;
            let reconnect = self.reconnect;

            let flow = tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        self.shutdown().await;
                        Flow::Stop
                    },
                },

                _ = sleep_until_opt(pong_deadline) => {
                    self.pong_deadline = None;
                    log::warn!(
                        "[circle-link] Pong timeout ({:?}), server unresponsive",
                        self.timeouts.pong_timeout
                    );
                    self.drop_socket_after_close(
                        CloseCode::Abnormal,
                        format!("Pong timeout ({:?})", self.timeouts.pong_timeout),
                    )
                    .await;
                    Flow::Continue
                },

                opened = poll_open(&mut self.pending_open) => {
                    self.pending_open = None;
                    self.on_open_result(opened).await;
                    Flow::Continue
                },

                _ = sleep_until_opt(connect_deadline) => {
                    self.pending_open = None;
                    self.connect_deadline = None;
                    let error = CircleLinkError::ConnectTimeout(format!(
                        "transport not open after {:?}",
                        self.timeouts.connection_timeout
                    ));
                    self.on_hard_failure(error).await;
                    Flow::Continue
                },

                _ = sleep_until_opt(auth_deadline) => {
                    self.auth_deadline = None;
                    if let Some(ws) = self.ws.take() {
                        websocket::close_normal(ws, "authentication timeout", &self.timeouts).await;
                    }
                    let error = CircleLinkError::ConnectTimeout(format!(
                        "no authentication reply after {:?}",
                        self.timeouts.auth_timeout
                    ));
                    self.on_hard_failure(error).await;
                    Flow::Continue
                },

                _ = sleep_until_opt(reconnect.map(|r| r.at)) => {
                    self.reconnect = None;
                    if reconnect.map(|r| r.generation) == Some(self.reconnect_generation) {
                        log::info!("[circle-link] Reconnecting");
                        self.connect().await;
                    }
                    Flow::Continue
                },

                _ = sleep_until_opt(keepalive_deadline) => {
                    self.send_keepalive().await;
                    Flow::Continue
                },

                changed = token_changed(&mut self.token_rx) => {
                    match changed {
                        Some(token) => self.on_token_change(token).await,
                        None => {
                            log::debug!("[circle-link] Session change feed closed");
                            self.token_rx = None;
                        },
                    }
                    Flow::Continue
                },

                frame = next_frame(&mut self.ws) => {
                    self.on_frame(frame).await;
                    Flow::Continue
                },

                frame = next_frame(&mut self.parked) => {
                    self.on_parked_frame(frame).await;
                    Flow::Continue
                },
            };

            if let Flow::Stop = flow {
                log::debug!("[circle-link] Connection task stopped");
                return;
            }
        }
    }

    async fn handle_command(&mut self, cmd: ConnCmd) -> Flow {
        match cmd {
            ConnCmd::Connect => self.connect().await,
            ConnCmd::Disconnect { force } => self.disconnect(force).await,
            ConnCmd::Retry => {
                log::info!("[circle-link] Manual retry: clearing failure history");
                self.cancel_reconnect();
                self.core.retry();
                self.connect().await;
            },
            ConnCmd::Send { message, result_tx } => {
                let result = self.send(message).await;
                let _ = result_tx.send(result);
            },
            ConnCmd::QueueLen { result_tx } => {
                let _ = result_tx.send(self.queue.len());
            },
            ConnCmd::Shutdown { done_tx } => {
                self.shutdown().await;
                if let Some(tx) = done_tx {
                    let _ = tx.send(());
                }
                return Flow::Stop;
            },
        }
        Flow::Continue
    }

    fn notify(&self, notice: ConnectivityNotice) {
        if notice.is_terminal() {
            log::warn!("[circle-link] {}", notice);
        } else {
            log::info!("[circle-link] {}", notice);
        }
        self.dispatcher.publish_notice(notice.clone());
        self.handlers.emit_notice(notice);
    }

    fn cancel_reconnect(&mut self) {
        self.reconnect = None;
        self.reconnect_generation += 1;
    }

    fn clear_socket_timers(&mut self) {
        self.auth_deadline = None;
        self.keepalive_deadline = None;
        self.pong_deadline = None;
    }

    fn arm_keepalive(&mut self) {
        self.keepalive_deadline = websocket::deadline_after(self.timeouts.keepalive_interval);
    }

    // ── connect / disconnect ────────────────────────────────────────────

    async fn connect(&mut self) {
        if let Some(ws) = self.parked.take() {
            log::info!("[circle-link] Re-using parked connection");
            self.cancel_reconnect();
            self.ws = Some(ws);
            self.core.adopt_parked();
            self.arm_keepalive();
            self.handlers.emit_connect();
            self.drain_queue().await;
            return;
        }

        let token = self.session.token().await;
        match self.core.begin_connect(token) {
            ConnectDecision::Proceed(token) => {
                self.cancel_reconnect();
                let url = match websocket::build_ws_url(&self.base_url, &self.options, &token) {
                    Ok(url) => url,
                    Err(e) => {
                        log::warn!("[circle-link] {}", e);
                        self.core.abort_attempt();
                        self.handlers.emit_error(e);
                        return;
                    },
                };
                log::info!("[circle-link] Connecting to {}", websocket::redact_ws_url(&url));
                self.active_token = Some(token);
                self.pending_open = Some(Box::pin(websocket::open_ws(url)));
                self.connect_deadline = websocket::deadline_after(self.timeouts.connection_timeout);
            },
            ConnectDecision::NoToken => {
                log::debug!("[circle-link] connect() ignored: no session token");
            },
            ConnectDecision::Locked => {
                log::debug!("[circle-link] connect() ignored: attempt already in flight");
            },
            ConnectDecision::AlreadyConnected => {
                log::debug!("[circle-link] connect() ignored: already connected");
            },
            ConnectDecision::PermanentlyFailed { notice } => {
                log::warn!(
                    "[circle-link] connect() refused: connection permanently failed, call retry_connection()"
                );
                if let Some(notice) = notice {
                    self.notify(notice);
                }
            },
        }
    }

    async fn disconnect(&mut self, force: bool) {
        self.cancel_reconnect();
        self.pending_open = None;
        self.connect_deadline = None;
        self.clear_socket_timers();

        let was_connected = self.core.state().is_connected();
        let keep_open = !force && self.foreground.load(Ordering::Acquire);
        let park = was_connected && keep_open;

        if let Some(ws) = self.ws.take() {
            if park {
                log::info!("[circle-link] Disconnected; socket parked for re-use");
                self.parked = Some(ws);
            } else {
                self.core.begin_closing();
                websocket::close_normal(ws, "client disconnect", &self.timeouts).await;
                log::info!("[circle-link] Disconnected");
            }
        }
        if !keep_open {
            if let Some(parked) = self.parked.take() {
                websocket::close_normal(parked, "client disconnect", &self.timeouts).await;
            }
        }

        self.core.on_disconnect();
        if was_connected {
            self.handlers.emit_disconnect(DisconnectReason::with_code(
                "Client disconnected",
                CloseCode::Normal,
            ));
        }
    }

    async fn shutdown(&mut self) {
        let was_connected = self.core.state().is_connected();
        self.cancel_reconnect();
        self.pending_open = None;
        self.connect_deadline = None;
        self.clear_socket_timers();
        if let Some(ws) = self.ws.take() {
            websocket::close_normal(ws, "client shutdown", &self.timeouts).await;
        }
        if let Some(ws) = self.parked.take() {
            websocket::close_normal(ws, "client shutdown", &self.timeouts).await;
        }
        if !self.queue.is_empty() {
            log::warn!(
                "[circle-link] Shutting down with {} undelivered message(s)",
                self.queue.len()
            );
        }
        self.core.shutdown();
        if was_connected {
            self.handlers.emit_disconnect(DisconnectReason::with_code(
                "Client shut down",
                CloseCode::Normal,
            ));
        }
    }

    async fn on_token_change(&mut self, token: Option<String>) {
        match token {
            None => {
                log::info!("[circle-link] Session ended; disconnecting");
                self.active_token = None;
                self.disconnect(true).await;
            },
            Some(token) => {
                let has_socket =
                    self.ws.is_some() || self.parked.is_some() || self.pending_open.is_some();
                if has_socket && self.active_token.as_deref() != Some(token.as_str()) {
                    log::info!("[circle-link] Session token changed; reconnecting");
                    self.disconnect(true).await;
                }
                self.connect().await;
            },
        }
    }

    // ── transport events ────────────────────────────────────────────────

    async fn on_open_result(&mut self, opened: Result<WebSocketStream>) {
        self.connect_deadline = None;
        match opened {
            Ok(ws) => {
                log::debug!("[circle-link] Transport open, awaiting authentication");
                self.ws = Some(ws);
                self.core.on_transport_open();
                self.auth_deadline = websocket::deadline_after(self.timeouts.auth_timeout);
            },
            Err(e) => self.on_hard_failure(e).await,
        }
    }

    /// Count the failure and act on the outcome. The socket, if any, is
    /// already gone.
    async fn on_hard_failure(&mut self, error: CircleLinkError) {
        self.clear_socket_timers();
        log::warn!("[circle-link] Connection failure: {}", error);
        self.handlers.emit_error(error);

        let step = self.core.on_hard_failure();
        if let Some(notice) = step.notice {
            self.notify(notice);
        }
        match step.outcome {
            FailureOutcome::Reconnect { delay, attempt } => {
                log::info!(
                    "[circle-link] Attempting reconnection in {}ms (attempt {}, {} failure(s) so far)",
                    delay.as_millis(),
                    attempt + 1,
                    step.counters.consecutive_failures
                );
                self.reconnect_generation += 1;
                self.reconnect = Some(ScheduledReconnect {
                    at: TokioInstant::now() + delay,
                    generation: self.reconnect_generation,
                });
            },
            FailureOutcome::Idle => {
                log::info!("[circle-link] Auto-reconnect disabled; staying disconnected");
            },
            FailureOutcome::PermanentlyFailed => {
                log::warn!(
                    "[circle-link] Connection permanently failed after {} failure(s); call retry_connection()",
                    step.counters.consecutive_failures
                );
            },
        }
    }

    async fn on_frame(&mut self, frame: Option<std::result::Result<WsMessage, WsError>>) {
        self.pong_deadline = None;
        if self.core.state().is_connected() {
            self.arm_keepalive();
        }

        match websocket::decode_frame(frame) {
            Ok(Inbound::Text(text)) => self.on_text(text).await,
            Ok(Inbound::Ping(payload)) => {
                if let Some(ws) = self.ws.as_mut() {
                    let _ = websocket::send_pong(ws, payload, &self.timeouts).await;
                }
            },
            Ok(Inbound::Pong) => log::debug!("[circle-link] Keepalive: received Pong"),
            Ok(Inbound::Closed { code, reason }) => {
                self.ws = None;
                self.on_closed(code, reason).await;
            },
            Ok(Inbound::Ignored) => {},
            Err(e) => log::warn!("[circle-link] Dropping inbound frame: {}", e),
        }
    }

    /// The active socket is already dropped.
    async fn on_closed(&mut self, code: CloseCode, reason: String) {
        self.clear_socket_timers();
        let was_connected = self.core.state().is_connected();
        if code.is_normal() {
            log::info!("[circle-link] Connection {} ({})", code.diagnostic(), reason);
        } else {
            log::warn!(
                "[circle-link] Connection closed with code {}: {} ({})",
                code,
                code.diagnostic(),
                reason
            );
        }
        if was_connected {
            self.handlers
                .emit_disconnect(DisconnectReason::with_code(reason.clone(), code));
        }

        if code.is_normal() {
            self.core.on_clean_close();
        } else {
            self.on_hard_failure(CircleLinkError::AbnormalClose {
                code: code.as_u16(),
                reason,
            })
            .await;
        }
    }

    /// Close the active socket ourselves and treat it as a close with `code`.
    async fn drop_socket_after_close(&mut self, code: CloseCode, reason: String) {
        if let Some(ws) = self.ws.take() {
            websocket::close_normal(ws, "connection unresponsive", &self.timeouts).await;
        }
        self.on_closed(code, reason).await;
    }

    async fn on_parked_frame(&mut self, frame: Option<std::result::Result<WsMessage, WsError>>) {
        match websocket::decode_frame(frame) {
            Ok(Inbound::Text(text)) => {
                self.handlers.emit_receive(&text);
                match Message::from_json(&text) {
                    Ok(message) => self.dispatch(&message),
                    Err(e) => log::warn!("[circle-link] {}", e),
                }
            },
            Ok(Inbound::Closed { code, reason }) => {
                log::info!(
                    "[circle-link] Parked connection closed with code {} ({}); not reconnecting",
                    code,
                    reason
                );
                self.parked = None;
            },
            Ok(_) => {},
            Err(e) => log::warn!("[circle-link] Dropping inbound frame: {}", e),
        }
    }

    async fn on_text(&mut self, text: String) {
        self.handlers.emit_receive(&text);
        let message = match Message::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[circle-link] {}", e);
                return;
            },
        };

        match message.kind() {
            AUTHENTICATION_SUCCESS => self.on_auth_success().await,
            AUTHENTICATION_ERROR => self.on_auth_error(message.auth_error_reason()).await,
            _ => self.dispatch(&message),
        }
    }

    fn dispatch(&self, message: &Message) {
        let report = self.dispatcher.dispatch(message);
        log::debug!(
            "[circle-link] Dispatched '{}' to {} subscriber(s)",
            message.kind(),
            report.delivered
        );
        for error in report.errors {
            self.handlers.emit_error(error);
        }
    }

    async fn on_auth_success(&mut self) {
        if self.core.state() != ConnectionState::AwaitingAuth {
            log::debug!("[circle-link] Ignoring authentication_success outside handshake");
            return;
        }
        self.auth_deadline = None;
        let notice = self.core.on_auth_success();
        log::info!("[circle-link] WebSocket authenticated successfully");
        self.arm_keepalive();
        self.handlers.emit_connect();
        if let Some(notice) = notice {
            self.notify(notice);
        }
        self.drain_queue().await;
    }

    async fn on_auth_error(&mut self, reason: String) {
        if self.core.state() != ConnectionState::AwaitingAuth {
            log::debug!("[circle-link] Ignoring authentication_error outside handshake");
            return;
        }
        self.clear_socket_timers();
        log::warn!("[circle-link] Authentication rejected: {}", reason);
        if let Some(ws) = self.ws.take() {
            websocket::close_normal(ws, "authentication rejected", &self.timeouts).await;
        }
        let notice = self.core.on_auth_rejected(&reason);
        self.handlers.emit_error(CircleLinkError::AuthRejected(reason));
        self.notify(notice);
    }

    async fn send_keepalive(&mut self) {
        self.keepalive_deadline = None;
        let Some(ws) = self.ws.as_mut() else {
            return;
        };
        match websocket::send_ping(ws, &self.timeouts).await {
            Ok(()) => {
                self.handlers.emit_send("[ping]");
                self.arm_keepalive();
                if !self.timeouts.pong_timeout.is_zero() {
                    self.pong_deadline = websocket::deadline_after(self.timeouts.pong_timeout);
                }
            },
            Err(e) => {
                log::warn!("[circle-link] {}", e);
                self.drop_socket_after_close(CloseCode::Abnormal, e.to_string()).await;
            },
        }
    }

    // ── outbound ────────────────────────────────────────────────────────

    async fn transmit(&mut self, message: &Message) -> Result<()> {
        let Some(ws) = self.ws.as_mut() else {
            return Err(CircleLinkError::NotConnected);
        };
        let text = message.to_json()?;
        websocket::send_text(ws, text.clone(), &self.timeouts).await?;
        self.handlers.emit_send(&text);
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        if !self.core.state().is_connected() {
            log::debug!(
                "[circle-link] Not connected; queued '{}' ({} pending)",
                message.kind(),
                self.queue.len() + 1
            );
            self.queue.push_back(message);
            return Err(CircleLinkError::NotConnected);
        }

        match self.transmit(&message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("[circle-link] Send of '{}' failed, re-queued: {}", message.kind(), e);
                self.queue.push_front(message);
                Err(CircleLinkError::SendFailure(e.to_string()))
            },
        }
    }

    /// Deliver queued messages in order. The first failure puts the message
    /// back at the front and stops until the next authentication.
    async fn drain_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        log::info!("[circle-link] Delivering {} queued message(s)", self.queue.len());
        while let Some(message) = self.queue.pop_front() {
            if let Err(e) = self.transmit(&message).await {
                log::warn!(
                    "[circle-link] Queue drain halted at '{}': {} ({} left)",
                    message.kind(),
                    e,
                    self.queue.len() + 1
                );
                self.queue.push_front(message);
                break;
            }
        }
    }
}
