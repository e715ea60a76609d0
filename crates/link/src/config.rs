//! Connection settings for Ephys Link.

use std::time::Duration;

/// Default Ephys Link host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default Ephys Link port.
pub const DEFAULT_PORT: u16 = 3000;

/// Ephys Link client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Upper bound on a single remote call
    pub call_timeout: Duration,
    /// Upper bound on the connection handshake
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            call_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkConfig {
    /// Configuration for a host and port with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Override the call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Socket.IO endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/socket.io/", self.host, self.port)
    }
}
