//! In-process WebSocket backend for integration tests.
//!
//! [`MockServer`] speaks the circle wire protocol: it reads the token from
//! the handshake query, answers with a scripted auth reply, records every
//! text frame it receives, and can push messages or close every open
//! connection on demand. A deaf connection stops reading: pings go
//! unanswered and client writes back up once the socket buffers fill.

#![allow(dead_code)]

use circle_link::{
    CircleLinkTimeouts, ConnectionManager, ConnectionManagerBuilder, ConnectionOptions,
    ConnectionState, ConnectivityNotice, ReconnectPolicy,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How the server answers a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Success,
    Error(String),
    /// Never answer; the client's auth deadline has to fire.
    Silent,
}

#[derive(Debug, Clone)]
enum ServerCmd {
    Push(String),
    Close(u16),
    /// Drop the TCP stream without a close frame.
    Kill,
}

struct ServerState {
    auth: Mutex<AuthReply>,
    deaf: AtomicBool,
    handshakes: AtomicUsize,
    open: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    paths: Mutex<Vec<String>>,
    received: Mutex<Vec<JsonValue>>,
    control: broadcast::Sender<ServerCmd>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(auth: AuthReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);
        let state = Arc::new(ServerState {
            auth: Mutex::new(auth),
            deaf: AtomicBool::new(false),
            handshakes: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            paths: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            control,
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(handle_connection(stream, state));
            }
        });

        Self { addr, state, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_auth(&self, auth: AuthReply) {
        *self.state.auth.lock() = auth;
    }

    /// Connections opened from now on go deaf right after the auth reply.
    pub fn set_deaf(&self, deaf: bool) {
        self.state.deaf.store(deaf, Ordering::SeqCst);
    }

    /// Completed WebSocket handshakes so far.
    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().clone()
    }

    /// Every JSON message received from clients, in arrival order.
    pub fn received(&self) -> Vec<JsonValue> {
        self.state.received.lock().clone()
    }

    pub fn push(&self, kind: &str, payload: JsonValue) {
        self.push_raw(json!({ "type": kind, "payload": payload }).to_string());
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.state.control.send(ServerCmd::Push(text.into()));
    }

    pub fn close_all(&self, code: u16) {
        let _ = self.state.control.send(ServerCmd::Close(code));
    }

    pub fn kill_all(&self) {
        let _ = self.state.control.send(ServerCmd::Kill);
    }

    pub async fn wait_for_handshakes(&self, n: usize) {
        wait_until(Duration::from_secs(5), || self.handshakes() >= n).await;
    }

    pub async fn wait_for_received(&self, n: usize) {
        wait_until(Duration::from_secs(5), || self.received().len() >= n).await;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) {
    let mut control = state.control.subscribe();
    let mut token = None;
    let mut path = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = Some(req.uri().path().to_string());
        token = req.uri().query().and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == "token")
                .map(|(_, v)| v.into_owned())
        });
        Ok(resp)
    };

    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    state.handshakes.fetch_add(1, Ordering::SeqCst);
    state.open.fetch_add(1, Ordering::SeqCst);
    state.tokens.lock().push(token.unwrap_or_default());
    state.paths.lock().push(path.unwrap_or_default());

    let reply = state.auth.lock().clone();
    let first = match reply {
        AuthReply::Success => Some(json!({ "type": "authentication_success", "payload": null })),
        AuthReply::Error(reason) => Some(json!({
            "type": "authentication_error",
            "payload": { "message": reason }
        })),
        AuthReply::Silent => None,
    };
    if let Some(first) = first {
        if ws.send(WsMessage::Text(first.to_string().into())).await.is_err() {
            state.open.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    }

    let deaf = state.deaf.load(Ordering::SeqCst);
    loop {
        tokio::select! {
            frame = ws.next(), if !deaf => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<JsonValue>(text.as_str()) {
                        state.received.lock().push(value);
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {},
            },
            cmd = control.recv() => match cmd {
                Ok(ServerCmd::Push(text)) => {
                    if ws.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Ok(ServerCmd::Close(code)) => {
                    let frame = CloseFrame {
                        code: WsCloseCode::from(code),
                        reason: String::from("server closing").into(),
                    };
                    let _ = ws.close(Some(frame)).await;
                    break;
                },
                Ok(ServerCmd::Kill) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    state.open.fetch_sub(1, Ordering::SeqCst);
}

/// Accepts TCP connections and never answers the WebSocket upgrade.
pub async fn stalled_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (format!("http://{}", addr), task)
}

/// A local address nobody listens on.
pub async fn refused_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Short deadlines, no keepalive.
pub fn fast_timeouts() -> CircleLinkTimeouts {
    CircleLinkTimeouts::builder()
        .connection_timeout(Duration::from_millis(300))
        .auth_timeout(Duration::from_millis(300))
        .send_timeout(Duration::from_secs(1))
        .keepalive_interval(Duration::ZERO)
        .pong_timeout(Duration::ZERO)
        .build()
}

/// 30ms, 60ms, 120ms... capped at 200ms.
pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::Exponential {
        base_delay_ms: 30,
        max_delay_ms: 200,
        max_attempts: 5,
    }
}

/// Builder pointed at `base_url` with [`fast_timeouts`] and [`fast_policy`].
pub fn fast_builder(base_url: &str) -> ConnectionManagerBuilder {
    ConnectionManager::builder()
        .base_url(base_url)
        .timeouts(fast_timeouts())
        .connection_options(ConnectionOptions::default().with_reconnect_policy(fast_policy()))
}

pub async fn next_notice(
    rx: &mut tokio::sync::broadcast::Receiver<ConnectivityNotice>,
) -> ConnectivityNotice {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no notice within 5s")
        .expect("notice channel closed")
}

pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            limit
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.state_changes();
    let reached = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(
        reached,
        "state {} not reached, still {}",
        state,
        manager.state()
    );
}

/// Let the connection task run for a while without expecting anything.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
