//! Engine and listener configuration.

use std::time::Duration;

use eio_transport::TransportOptions;

use crate::session::SessionConfig;

/// Protocol-level settings shared by every session of one engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Mount path of the engine endpoint
    pub path: String,
    /// Interval between server heartbeat pings
    pub ping_interval: Duration,
    /// Silence after which a session is considered dead
    pub ping_timeout: Duration,
    /// Maximum time a polling GET is held open
    pub poll_timeout: Duration,
    /// Maximum polling POST body, in bytes
    pub max_http_buffer_size: usize,
    /// Allow sessions to switch transports
    pub allow_upgrades: bool,
    /// Enabled transports, by name
    pub transports: Vec<String>,
    /// Name of the cookie carrying the session id (None disables it)
    pub cookie: Option<String>,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum concurrently open sessions
    pub max_sessions: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: "/engine.io/".into(),
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(30),
            max_http_buffer_size: 1_000_000,
            allow_upgrades: true,
            transports: vec!["polling".into(), "websocket".into()],
            cookie: Some("io".into()),
            enable_cors: false,
            max_sessions: None,
        }
    }
}

impl EngineConfig {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            poll_timeout: self.poll_timeout,
            max_http_buffer_size: self.max_http_buffer_size,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            allow_upgrades: self.allow_upgrades,
        }
    }
}

/// Listener configuration for [`EngineServer`](crate::EngineServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".into(),
            port: 3000,
            engine: EngineConfig::default(),
        }
    }
}
