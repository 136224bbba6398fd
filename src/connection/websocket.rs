//! Low-level WebSocket helpers: target URL, open, frame decode, writes.

use bytes::Bytes;
use futures_util::SinkExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::MaybeTlsStream;
use url::Url;

use crate::error::{CircleLinkError, Result};
use crate::models::{CloseCode, ConnectionOptions};
use crate::timeouts::CircleLinkTimeouts;

pub(crate) type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Query parameter carrying the session token in the handshake target.
pub(crate) const TOKEN_QUERY_PARAM: &str = "token";

/// Parse and validate the backend base URL.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url.trim()).map_err(|e| {
        CircleLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {},
        other => {
            return Err(CircleLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}': expected http, https, ws or wss",
                other
            )))
        },
    }
    if url.host_str().is_none() {
        return Err(CircleLinkError::ConfigurationError(format!(
            "base_url '{}' has no host",
            base_url
        )));
    }
    Ok(url)
}

/// Handshake target: `ws[s]://host[:port]/<base path><ws_path>?token=<token>`.
///
/// `wss` when the page is secure or the base URL is already secure.
pub(crate) fn build_ws_url(base: &Url, options: &ConnectionOptions, token: &str) -> Result<Url> {
    let secure = options.page_secure || matches!(base.scheme(), "https" | "wss");
    let mut url = base.clone();
    url.set_scheme(if secure { "wss" } else { "ws" }).map_err(|_| {
        CircleLinkError::ConfigurationError(format!("Cannot derive a WebSocket URL from {}", base))
    })?;

    let ws_path = options.ws_path.trim();
    let ws_path = ws_path.strip_prefix('/').unwrap_or(ws_path);
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{}/{}", prefix, ws_path));
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    Ok(url)
}

/// URL safe to log: the token value is masked.
pub(crate) fn redact_ws_url(url: &Url) -> String {
    let has_token = url.query_pairs().any(|(k, _)| k == TOKEN_QUERY_PARAM);
    let mut shown = url.clone();
    shown.set_query(None);
    if has_token {
        format!("{}?{}=***", shown, TOKEN_QUERY_PARAM)
    } else {
        shown.to_string()
    }
}

/// Open the transport. The caller owns the deadline.
pub(crate) async fn open_ws(url: Url) -> Result<WebSocketStream> {
    log::debug!("[circle-link] Opening WebSocket to {}", redact_ws_url(&url));
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => Ok(stream),
        Err(WsError::Http(response)) => {
            let message = match response.status().as_u16() {
                401 => "Unauthorized: WebSocket upgrade refused".to_string(),
                403 => "Forbidden: WebSocket upgrade refused".to_string(),
                code => format!("WebSocket HTTP error: {}", code),
            };
            Err(CircleLinkError::WebSocketError(message))
        },
        Err(e) => Err(CircleLinkError::WebSocketError(format!("Connection failed: {}", e))),
    }
}

/// Inbound frame reduced to what the connection task acts on.
#[derive(Debug)]
pub(crate) enum Inbound {
    Text(String),
    Ping(Bytes),
    Pong,
    /// Close frame, or the transport ending; carries the effective code.
    Closed { code: CloseCode, reason: String },
    Ignored,
}

/// Reduce a raw stream item. `None` (stream ended) and transport errors
/// count as an abnormal close.
pub(crate) fn decode_frame(item: Option<std::result::Result<WsMessage, WsError>>) -> Result<Inbound> {
    match item {
        Some(Ok(WsMessage::Text(text))) => Ok(Inbound::Text(text.as_str().to_string())),
        Some(Ok(WsMessage::Binary(data))) => std::str::from_utf8(&data)
            .map(|text| Inbound::Text(text.to_string()))
            .map_err(|e| CircleLinkError::MalformedMessage(format!("Binary frame is not UTF-8: {}", e))),
        Some(Ok(WsMessage::Ping(payload))) => Ok(Inbound::Ping(payload)),
        Some(Ok(WsMessage::Pong(_))) => Ok(Inbound::Pong),
        Some(Ok(WsMessage::Close(frame))) => Ok(match frame {
            Some(f) => Inbound::Closed {
                code: CloseCode::from(u16::from(f.code)),
                reason: f.reason.as_str().to_string(),
            },
            // 1005: close frame without a status code
            None => Inbound::Closed {
                code: CloseCode::Other(1005),
                reason: "Server closed connection without a status code".to_string(),
            },
        }),
        Some(Ok(WsMessage::Frame(_))) => Ok(Inbound::Ignored),
        Some(Err(e)) => Ok(Inbound::Closed {
            code: CloseCode::Abnormal,
            reason: format!("WebSocket error: {}", e),
        }),
        None => Ok(Inbound::Closed {
            code: CloseCode::Abnormal,
            reason: "WebSocket stream ended".to_string(),
        }),
    }
}

async fn with_send_timeout<F>(timeouts: &CircleLinkTimeouts, what: &str, fut: F) -> Result<()>
where
    F: std::future::Future<Output = std::result::Result<(), WsError>>,
{
    let result = if CircleLinkTimeouts::is_no_timeout(timeouts.send_timeout) {
        fut.await
    } else {
        match tokio::time::timeout(timeouts.send_timeout, fut).await {
            Ok(r) => r,
            Err(_) => {
                return Err(CircleLinkError::WebSocketError(format!(
                    "{} timed out after {:?}",
                    what, timeouts.send_timeout
                )))
            },
        }
    };
    result.map_err(|e| CircleLinkError::WebSocketError(format!("{} failed: {}", what, e)))
}

pub(crate) async fn send_text(
    ws: &mut WebSocketStream,
    text: String,
    timeouts: &CircleLinkTimeouts,
) -> Result<()> {
    with_send_timeout(timeouts, "Send", ws.send(WsMessage::Text(text.into()))).await
}

pub(crate) async fn send_ping(ws: &mut WebSocketStream, timeouts: &CircleLinkTimeouts) -> Result<()> {
    with_send_timeout(timeouts, "Keepalive ping", ws.send(WsMessage::Ping(Bytes::new()))).await
}

pub(crate) async fn send_pong(
    ws: &mut WebSocketStream,
    payload: Bytes,
    timeouts: &CircleLinkTimeouts,
) -> Result<()> {
    with_send_timeout(timeouts, "Pong", ws.send(WsMessage::Pong(payload))).await
}

/// Best-effort close with code 1000.
pub(crate) async fn close_normal(mut ws: WebSocketStream, reason: &str, timeouts: &CircleLinkTimeouts) {
    let frame = CloseFrame {
        code: WsCloseCode::Normal,
        reason: String::from(reason).into(),
    };
    if let Err(e) = with_send_timeout(timeouts, "Close", ws.close(Some(frame))).await {
        log::debug!("[circle-link] Close handshake not completed: {}", e);
    }
}

/// `None` when the duration means "no deadline".
pub(crate) fn deadline_after(duration: Duration) -> Option<tokio::time::Instant> {
    if CircleLinkTimeouts::is_no_timeout(duration) {
        None
    } else {
        Some(tokio::time::Instant::now() + duration)
    }
}
