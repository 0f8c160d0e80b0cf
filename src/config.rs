//! Relay Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;

/// Default chat port.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:12345";

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the chat listener binds to.
    pub listen_addr: SocketAddr,
    /// Largest accepted frame in bytes. Bigger frames are drained and dropped.
    pub max_frame_size: usize,
    /// Address for `/metrics` and `/health`. `None` disables the HTTP server.
    pub metrics_addr: Option<SocketAddr>,
    /// Optional bearer token required on `/metrics`.
    pub metrics_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
            max_frame_size: 64 * 1024,
            metrics_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9102))),
            metrics_token: None,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(parsed) = lookup("RELAY_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
            config.listen_addr = parsed;
        }

        if let Some(parsed) = lookup("RELAY_MAX_FRAME_SIZE").and_then(|v| v.parse().ok()) {
            config.max_frame_size = parsed;
        }

        if let Some(val) = lookup("RELAY_METRICS_ADDR") {
            match val.to_lowercase().as_str() {
                "off" | "none" | "" => config.metrics_addr = None,
                other => {
                    if let Ok(parsed) = other.parse() {
                        config.metrics_addr = Some(parsed);
                    }
                }
            }
        }

        config.metrics_token = lookup("RELAY_METRICS_TOKEN").filter(|t| !t.is_empty());

        config
    }
}

/// Terminal client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    /// `None` lets the relay name the session after the client's address.
    pub username: Option<String>,
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_addr: DEFAULT_LISTEN_ADDR.to_string(),
            username: None,
            max_frame_size: 64 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup("RELAY_SERVER_ADDR").filter(|a| !a.is_empty()) {
            config.server_addr = addr;
        }
        config.username = lookup("RELAY_USERNAME")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if let Some(parsed) = lookup("RELAY_MAX_FRAME_SIZE").and_then(|v| v.parse().ok()) {
            config.max_frame_size = parsed;
        }
        config
    }
}
