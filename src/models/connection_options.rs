use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;

/// Connection-level options for the real-time transport.
///
/// These options control:
/// - How the WebSocket target is derived from the backend base URL
/// - Automatic reconnection and the delay policy between attempts
/// - How many hard failures are tolerated before giving up
///
/// # Example
///
/// ```rust
/// use circle_link::{ConnectionOptions, ReconnectPolicy};
///
/// let options = ConnectionOptions::default()
///     .with_ws_path("/realtime")
///     .with_page_secure(true)
///     .with_reconnect_policy(ReconnectPolicy::fixed())
///     .with_failure_threshold(3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Path of the WebSocket endpoint on the backend host.
    /// Default: `/ws`
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Whether the hosting context is itself served over HTTPS.
    /// Forces `wss://` even when `base_url` is plain HTTP.
    /// Default: false
    #[serde(default)]
    pub page_secure: bool,

    /// Enable automatic reconnection after hard failures.
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Delay policy and attempt budget for automatic reconnects.
    /// Default: exponential, 1 s base, 30 s cap, 5 attempts
    #[serde(default)]
    pub reconnect_policy: ReconnectPolicy,

    /// Consecutive hard failures after which the connection is marked
    /// permanently failed.
    /// Default: 3
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            page_secure: false,
            auto_reconnect: true,
            reconnect_policy: ReconnectPolicy::default(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the WebSocket endpoint path
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Mark the hosting context as secure (forces `wss://`)
    pub fn with_page_secure(mut self, secure: bool) -> Self {
        self.page_secure = secure;
        self
    }

    /// Set whether to automatically reconnect after hard failures
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the reconnect delay policy
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Set the consecutive-failure threshold. Values below 1 are clamped to 1.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}
