use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CircleLinkError, Result};

/// Server → client: the handshake token was accepted.
pub const AUTHENTICATION_SUCCESS: &str = "authentication_success";

/// Server → client: the handshake token was rejected. Payload carries a reason.
pub const AUTHENTICATION_ERROR: &str = "authentication_error";

/// A typed message, in either direction.
///
/// Wire form is `{"type": "...", "payload": ...}`; a missing `payload`
/// decodes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: JsonValue,
}

impl Message {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// `true` for the handshake kinds the connection core consumes itself.
    pub fn is_reserved(&self) -> bool {
        is_reserved_kind(&self.kind)
    }

    /// Human-readable reason carried by an `authentication_error`.
    ///
    /// Accepts a bare string payload or an object with `message` / `reason`.
    pub fn auth_error_reason(&self) -> String {
        match &self.payload {
            JsonValue::String(s) => s.clone(),
            JsonValue::Object(map) => map
                .get("message")
                .or_else(|| map.get("reason"))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.payload.to_string()),
            JsonValue::Null => "no reason given".to_string(),
            other => other.to_string(),
        }
    }

    /// Encode for a text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            CircleLinkError::MalformedMessage(format!("Failed to serialize '{}': {}", self.kind, e))
        })
    }

    /// Decode an inbound text frame.
    ///
    /// Rejects anything that is not an object with a non-empty string `type`.
    pub fn from_json(text: &str) -> Result<Self> {
        let msg: Message = serde_json::from_str(text)
            .map_err(|e| CircleLinkError::MalformedMessage(format!("Invalid frame: {}", e)))?;
        if msg.kind.trim().is_empty() {
            return Err(CircleLinkError::MalformedMessage(
                "Frame has an empty 'type' field".to_string(),
            ));
        }
        Ok(msg)
    }
}

pub fn is_reserved_kind(kind: &str) -> bool {
    kind == AUTHENTICATION_SUCCESS || kind == AUTHENTICATION_ERROR
}
