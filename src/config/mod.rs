//! Runtime settings for the listener and the per-connection pipeline.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::sync::Semaphore;

/// Default TCP port the proxy listens on.
pub const DEFAULT_PORT: u16 = 2100;

/// Listener address, admission limit, timeouts and buffer caps.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use relay10::config::ProxyConfig;
///
/// let config = ProxyConfig::default()
///     .port(8080)
///     .max_connections(64)
///     .connect_timeout(Duration::from_secs(3));
/// assert_eq!(config.listen_addr().port(), 8080);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub address: IpAddr,
    pub port: u16,
    /// Connections handled at once; the acceptor waits for a free slot.
    pub max_connections: usize,
    /// Deadline for receiving the client's whole request head.
    pub client_read_timeout: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on each read from the origin.
    pub upstream_read_timeout: Duration,
    /// Upper bound on sending the request to the origin and the response to the client.
    pub write_timeout: Duration,
    /// Largest client request head accepted, in bytes.
    pub max_request_size: usize,
    /// Largest origin response relayed, in bytes.
    pub max_response_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            max_connections: 1024,
            client_read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            upstream_read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_request_size: 64 * 1024,
            max_response_size: 64 * 1024 * 1024,
        }
    }
}

impl ProxyConfig {
    #[must_use]
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Clamped to between one and the largest permit count a semaphore holds.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    #[must_use]
    pub fn client_read_timeout(mut self, timeout: Duration) -> Self {
        self.client_read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn upstream_read_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    #[must_use]
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}
