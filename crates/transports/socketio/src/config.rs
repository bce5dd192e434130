//! Relay connection settings

use peercall_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Socket.io relay connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    /// Relay base URL (http, https, ws or wss)
    pub url: String,

    /// Bearer token sent in the Socket.IO CONNECT auth payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Engine.IO endpoint path
    pub path: String,

    /// Seconds allowed for the WebSocket upgrade plus handshake (default: 10)
    pub connect_timeout_secs: u64,

    /// Reconnect after the relay drops the connection (default: true)
    pub reconnect: bool,

    /// First reconnect delay in milliseconds, doubled per failed attempt (default: 1000)
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds (default: 5000)
    pub reconnect_delay_max_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            token: None,
            path: "/socket.io/".to_string(),
            connect_timeout_secs: 10,
            reconnect: true,
            reconnect_delay_ms: 1_000,
            reconnect_delay_max_ms: 5_000,
        }
    }
}

impl SignalingConfig {
    /// Settings for `url` with everything else defaulted
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Attach an auth token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        self.websocket_url()?;

        if self.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.reconnect_delay_ms == 0 || self.reconnect_delay_max_ms < self.reconnect_delay_ms
        {
            return Err(Error::InvalidConfig(format!(
                "reconnect delays must satisfy 0 < reconnect_delay_ms <= reconnect_delay_max_ms, got {} and {}",
                self.reconnect_delay_ms, self.reconnect_delay_max_ms
            )));
        }

        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "Socket.io path must start with '/', got {}",
                self.path
            )));
        }

        Ok(())
    }

    /// Engine.IO WebSocket endpoint derived from the base URL
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid relay URL {}: {}", self.url, e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unsupported relay URL scheme: {}",
                    other
                )))
            }
        };

        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidConfig(format!("Cannot use scheme {}", scheme)))?;
        url.set_path(&self.path);
        url.set_query(Some("EIO=4&transport=websocket"));

        Ok(url)
    }

    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Delay before reconnect attempt `attempt` (zero-based), capped at the maximum
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let delay = self
            .reconnect_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.reconnect_delay_max_ms);
        Duration::from_millis(delay)
    }
}
