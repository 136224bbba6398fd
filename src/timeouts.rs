//! Timeout configuration for the real-time transport.
//!
//! Centralizes every deadline the connection task arms: transport
//! handshake, authentication reply, outbound writes, and keepalive.

use std::time::Duration;

/// Timeout configuration for connection operations.
///
/// # Examples
///
/// ```rust
/// use circle_link::CircleLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = CircleLinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = CircleLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .auth_timeout(Duration::from_secs(20))
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = CircleLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleLinkTimeouts {
    /// Deadline for the transport to open (TCP + TLS + WebSocket upgrade).
    /// Expiry is a hard failure.
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Deadline for `authentication_success` / `authentication_error` after open.
    /// Expiry is a hard failure.
    /// Default: 10 seconds
    pub auth_timeout: Duration,

    /// Deadline for a single outbound frame write.
    /// Default: 10 seconds
    pub send_timeout: Duration,

    /// Keep-alive ping interval while authenticated.
    /// Set to 0 to disable keep-alive pings.
    /// Default: 30 seconds
    pub keepalive_interval: Duration,

    /// Maximum wait for any frame after a keepalive Ping. Expiry tears the
    /// socket down as an abnormal close.
    /// Set to 0 to disable pong timeout checking.
    /// Default: 10 seconds
    pub pong_timeout: Duration,
}

impl Default for CircleLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl CircleLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> CircleLinkTimeoutsBuilder {
        CircleLinkTimeoutsBuilder::new()
    }

    /// Create timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }

    /// Create timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(20),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for creating custom [`CircleLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct CircleLinkTimeoutsBuilder {
    timeouts: CircleLinkTimeouts,
}

impl CircleLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: CircleLinkTimeouts::default(),
        }
    }

    /// Set the transport handshake timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the transport handshake timeout in seconds.
    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    /// Set the authentication reply timeout.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth_timeout = timeout;
        self
    }

    /// Set the authentication reply timeout in seconds.
    pub fn auth_timeout_secs(self, secs: u64) -> Self {
        self.auth_timeout(Duration::from_secs(secs))
    }

    /// Set the outbound write timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval.
    /// Set to 0 to disable keepalive pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the pong timeout (max wait for Pong after sending a Ping).
    /// Set to 0 to disable pong timeout checking.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> CircleLinkTimeouts {
        self.timeouts
    }
}
