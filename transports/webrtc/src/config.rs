//! Configuration types for the peer link

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration shared by the guest supervisor and the host fanout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerLinkConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// Liveness probe settings
    pub heartbeat: HeartbeatConfig,

    /// Reconnection backoff settings (guest side only)
    pub reconnect: ReconnectConfig,

    /// Data channel settings
    pub channels: ChannelConfig,

    /// Time an attempt may spend before the transport reports connected (default: 30000ms)
    pub connection_timeout_ms: u64,

    /// Time a request over the data channel waits for its response (default: 10000ms)
    pub rpc_timeout_ms: u64,
}

/// Heartbeat configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between pings in milliseconds (default: 15000ms)
    pub interval_ms: u64,

    /// Time a single ping may take in milliseconds (default: 5000ms)
    pub timeout_ms: u64,
}

/// Reconnection configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry in milliseconds (default: 2000ms)
    pub initial_delay_ms: u64,

    /// Upper bound for the retry delay in milliseconds (default: 64000ms)
    pub max_delay_ms: u64,

    /// Failed attempts before the user is told about connection trouble (default: 3)
    pub attempts_before_toast: u32,
}

/// Data channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Label of the application channel created by the guest (default: "game-rpc")
    pub label: String,

    /// Ordered delivery (default: true)
    pub ordered: bool,
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            channels: ChannelConfig::default(),
            connection_timeout_ms: 30_000,
            rpc_timeout_ms: 10_000,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 5_000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 64_000,
            attempts_before_toast: 3,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: "game-rpc".to_string(),
            ordered: true,
        }
    }
}

impl HeartbeatConfig {
    /// Ping interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Ping timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PeerLinkConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty or contains a non-STUN/TURN URL
    /// - heartbeat interval or timeout is zero, or the timeout is not shorter than the interval
    /// - reconnect initial delay is zero or greater than the max delay
    /// - connection or RPC timeout is zero
    /// - the channel label is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("turn:"))
        {
            return Err(Error::InvalidConfig(format!(
                "stun_servers entries must start with stun: or turn:, got {}",
                bad
            )));
        }

        if self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat interval and timeout must be non-zero".to_string(),
            ));
        }

        // A ping must settle before the next one is due
        if self.heartbeat.timeout_ms >= self.heartbeat.interval_ms {
            return Err(Error::InvalidConfig(format!(
                "heartbeat timeout ({}ms) must be shorter than the interval ({}ms)",
                self.heartbeat.timeout_ms, self.heartbeat.interval_ms
            )));
        }

        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms
        {
            return Err(Error::InvalidConfig(format!(
                "reconnect delays must satisfy 0 < initial ({}ms) <= max ({}ms)",
                self.reconnect.initial_delay_ms, self.reconnect.max_delay_ms
            )));
        }

        if self.connection_timeout_ms == 0 || self.rpc_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connection_timeout_ms and rpc_timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.channels.label.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "data channel label must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// RPC timeout as a Duration
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Create a configuration preset for peers on the same local network
    ///
    /// Faster liveness detection and quicker retries, since paths are short
    /// and a silent peer is almost always a dead one.
    ///
    /// # Example
    ///
    /// ```
    /// use tuneperfect_webrtc::config::PeerLinkConfig;
    ///
    /// let config = PeerLinkConfig::lan();
    /// assert_eq!(config.heartbeat.interval_ms, 5_000);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn lan() -> Self {
        Self {
            heartbeat: HeartbeatConfig {
                interval_ms: 5_000,
                timeout_ms: 2_000,
            },
            reconnect: ReconnectConfig {
                initial_delay_ms: 500,
                max_delay_ms: 8_000,
                attempts_before_toast: 3,
            },
            connection_timeout_ms: 10_000,
            rpc_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    /// Create a configuration preset for companions on cellular networks
    ///
    /// Longer timeouts for handoffs and a backup STUN server.
    ///
    /// # Example
    ///
    /// ```
    /// use tuneperfect_webrtc::config::PeerLinkConfig;
    ///
    /// let config = PeerLinkConfig::mobile_network();
    /// assert_eq!(config.stun_servers.len(), 2);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn mobile_network() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(), // Backup STUN
            ],
            heartbeat: HeartbeatConfig {
                interval_ms: 20_000,
                timeout_ms: 8_000,
            },
            reconnect: ReconnectConfig {
                initial_delay_ms: 3_000,
                max_delay_ms: 64_000,
                attempts_before_toast: 4,
            },
            connection_timeout_ms: 45_000, // More time for cellular handoffs
            rpc_timeout_ms: 15_000,
            ..Default::default()
        }
    }

    /// Replace the STUN server list
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set heartbeat interval and timeout in milliseconds
    pub fn with_heartbeat(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.heartbeat = HeartbeatConfig {
            interval_ms,
            timeout_ms,
        };
        self
    }

    /// Set reconnect delays in milliseconds
    pub fn with_reconnect(mut self, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.reconnect.initial_delay_ms = initial_delay_ms;
        self.reconnect.max_delay_ms = max_delay_ms;
        self
    }

    /// Set the number of failed attempts before the trouble notice
    pub fn with_attempts_before_toast(mut self, attempts: u32) -> Self {
        self.reconnect.attempts_before_toast = attempts;
        self
    }

    /// Set the connection timeout in milliseconds
    pub fn with_connection_timeout(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    /// Set the RPC timeout in milliseconds
    pub fn with_rpc_timeout(mut self, timeout_ms: u64) -> Self {
        self.rpc_timeout_ms = timeout_ms;
        self
    }
}
