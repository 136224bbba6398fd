//! Configuration file management.
//!
//! Loads [`LinkConfig`] from `<config_dir>/circle-link/config.toml` (or any
//! path) and turns it into a ready [`ConnectionManagerBuilder`].
//!
//! # Configuration Format
//!
//! ```toml
//! [server]
//! base_url = "https://api.circle.example"  # Backend base URL
//! ws_path = "/ws"                          # WebSocket endpoint path
//! page_secure = false                      # Force wss:// regardless of base_url
//!
//! [connection]
//! auto_reconnect = true
//! failure_threshold = 3                    # Hard failures before giving up
//!
//! [connection.reconnect_policy]
//! kind = "exponential"                     # or "fixed" (delay_ms, max_attempts)
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 5
//!
//! [timeouts]
//! connection_timeout_ms = 10000
//! auth_timeout_ms = 10000
//! send_timeout_ms = 10000
//! keepalive_interval_ms = 30000            # 0 disables keepalive pings
//! pong_timeout_ms = 10000
//!
//! [storage]
//! persist_failures = true
//! failure_store_path = "~/.config/circle-link/failures.toml"
//! ```
//!
//! Environment overrides: `CIRCLE_LINK_BASE_URL`, `CIRCLE_LINK_PAGE_SECURE`,
//! `CIRCLE_LINK_FAILURE_STORE`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::connection::ConnectionManagerBuilder;
use crate::error::{CircleLinkError, Result};
use crate::failure_store::{ArcFailureStore, FileFailureStore, MemoryFailureStore};
use crate::models::ConnectionOptions;
use crate::timeouts::CircleLinkTimeouts;

pub const ENV_BASE_URL: &str = "CIRCLE_LINK_BASE_URL";
pub const ENV_PAGE_SECURE: &str = "CIRCLE_LINK_PAGE_SECURE";
pub const ENV_FAILURE_STORE: &str = "CIRCLE_LINK_FAILURE_STORE";

/// Transport configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend base URL (e.g. https://api.circle.example)
    pub base_url: Option<String>,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default)]
    pub page_secure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default)]
    pub reconnect_policy: ReconnectPolicy,
}

/// Timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub auth_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub pong_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Keep failure counters on disk across restarts (default: true)
    #[serde(default = "default_persist_failures")]
    pub persist_failures: bool,

    /// Counters file; `~/` is expanded. Default: `<config_dir>/circle-link/failures.toml`
    pub failure_store_path: Option<String>,
}

fn default_ws_path() -> String {
    ConnectionOptions::default().ws_path
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    ConnectionOptions::default().failure_threshold
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_keepalive_interval_ms() -> u64 {
    30_000
}

fn default_persist_failures() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            ws_path: default_ws_path(),
            page_secure: false,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            failure_threshold: default_failure_threshold(),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_timeout_ms(),
            auth_timeout_ms: default_timeout_ms(),
            send_timeout_ms: default_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            pong_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_failures: default_persist_failures(),
            failure_store_path: None,
        }
    }
}

pub fn expand_config_path(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    }
    path.to_path_buf()
}

pub fn default_config_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("circle-link").join("config.toml")
    } else {
        expand_config_path(Path::new("~/.circle-link/config.toml"))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(CircleLinkError::ConfigurationError(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

impl LinkConfig {
    /// Load from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_config_path(path);
        if !path.exists() {
            log::debug!(
                "[circle-link] No config at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            CircleLinkError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load(&default_config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| {
            CircleLinkError::ConfigurationError(format!("Invalid config: {}", e.message()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let path = expand_config_path(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CircleLinkError::ConfigurationError(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| CircleLinkError::ConfigurationError(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&path, contents).map_err(|e| {
            CircleLinkError::ConfigurationError(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Apply `CIRCLE_LINK_*` overrides from `lookup` (normally the process
    /// environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.server.base_url = Some(url.trim().to_string());
        }
        if let Some(value) = lookup(ENV_PAGE_SECURE) {
            self.server.page_secure = parse_bool(ENV_PAGE_SECURE, &value)?;
        }
        if let Some(path) = lookup(ENV_FAILURE_STORE).filter(|v| !v.trim().is_empty()) {
            self.storage.failure_store_path = Some(path);
        }
        Ok(())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::new()
            .with_ws_path(self.server.ws_path.clone())
            .with_page_secure(self.server.page_secure)
            .with_auto_reconnect(self.connection.auto_reconnect)
            .with_reconnect_policy(self.connection.reconnect_policy)
            .with_failure_threshold(self.connection.failure_threshold)
    }

    pub fn timeouts(&self) -> CircleLinkTimeouts {
        let t = &self.timeouts;
        CircleLinkTimeouts::builder()
            .connection_timeout(Duration::from_millis(t.connection_timeout_ms))
            .auth_timeout(Duration::from_millis(t.auth_timeout_ms))
            .send_timeout(Duration::from_millis(t.send_timeout_ms))
            .keepalive_interval(Duration::from_millis(t.keepalive_interval_ms))
            .pong_timeout(Duration::from_millis(t.pong_timeout_ms))
            .build()
    }

    pub fn failure_store_path(&self) -> PathBuf {
        self.storage
            .failure_store_path
            .as_deref()
            .map(|p| expand_config_path(Path::new(p)))
            .unwrap_or_else(FileFailureStore::default_path)
    }

    /// File store when `persist_failures`, otherwise in-memory.
    pub fn failure_store(&self) -> Result<ArcFailureStore> {
        if self.storage.persist_failures {
            Ok(Arc::new(FileFailureStore::with_path(self.failure_store_path())?))
        } else {
            Ok(Arc::new(MemoryFailureStore::new()))
        }
    }

    /// Builder with URL, options, timeouts and failure store applied. The
    /// caller still supplies the session.
    pub fn builder(&self) -> Result<ConnectionManagerBuilder> {
        let base_url = self.server.base_url.clone().ok_or_else(|| {
            CircleLinkError::ConfigurationError(format!(
                "server.base_url is not set (config file or {})",
                ENV_BASE_URL
            ))
        })?;
        Ok(ConnectionManagerBuilder::new()
            .base_url(base_url)
            .connection_options(self.connection_options())
            .timeouts(self.timeouts())
            .failure_store_arc(self.failure_store()?))
    }
}
