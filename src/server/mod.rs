//! Async TCP listener and per-connection handler.
//!
//! Every accepted connection runs one pass of the handler and is then
//! closed; there is no keep-alive. A connection moves through
//!
//! ```text
//! AwaitHeaders → Parsed → { ControlHandled | Rejected | Forbidden | Relaying } → Responding → Closed
//! ```
//!
//! and the acceptor holds back once `max_connections` handlers are running.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::control;
use crate::http::{Request, RequestError, Response, StatusCode, find_header_end};
use crate::relay::{RelayError, UpstreamRelay};
use crate::state::ProxyState;

/// Errors produced by the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a connection ends without the normal response path.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client did not finish its request head within {0:?}")]
    ClientTimeout(Duration),

    #[error("client did not accept the response within {0:?}")]
    ClientWriteTimeout(Duration),

    #[error("upstream failed: {0}")]
    Relay(#[from] RelayError),
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// What a connection ends up sending back.
#[derive(Debug)]
enum Outcome {
    /// A control command ran.
    ControlHandled,
    /// Validation failed.
    Rejected(StatusCode),
    /// The target host is on the blocklist.
    Forbidden,
    /// Bytes from the origin, or from the cache after a `304`.
    Relayed(Bytes),
}

impl Outcome {
    fn into_bytes(self) -> Bytes {
        match self {
            Self::ControlHandled => Response::new(StatusCode::Ok).into_bytes().freeze(),
            Self::Rejected(status) => Response::new(status).into_bytes().freeze(),
            Self::Forbidden => Response::new(StatusCode::Forbidden).into_bytes().freeze(),
            Self::Relayed(bytes) => bytes,
        }
    }
}

/// Everything a connection task needs, shared across all of them.
#[derive(Debug)]
struct Shared {
    state: Arc<ProxyState>,
    relay: UpstreamRelay,
    client_read_timeout: Duration,
    write_timeout: Duration,
    max_request_size: usize,
}

/// The proxy server.
///
/// # Examples
///
/// ```rust,no_run
/// use relay10::config::ProxyConfig;
/// use relay10::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind(ProxyConfig::default()).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    limiter: Arc<Semaphore>,
}

impl Server {
    /// Binds the listener with fresh, empty proxy state.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(config: ProxyConfig) -> Result<Self, ServerError> {
        Self::bind_with_state(config, Arc::new(ProxyState::new())).await
    }

    /// Binds the listener around existing proxy state.
    ///
    /// # Errors
    ///
    /// Same as [`bind`](Self::bind).
    pub async fn bind_with_state(
        config: ProxyConfig,
        state: Arc<ProxyState>,
    ) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            limiter: Arc::new(Semaphore::new(
                config.max_connections.clamp(1, Semaphore::MAX_PERMITS),
            )),
            shared: Arc::new(Shared {
                state,
                relay: UpstreamRelay::new(&config),
                client_read_timeout: config.client_read_timeout,
                write_timeout: config.write_timeout,
                max_request_size: config.max_request_size,
            }),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The cache and blocklist this server mutates.
    pub fn state(&self) -> Arc<ProxyState> {
        Arc::clone(&self.shared.state)
    }

    /// Accepts connections until the process ends, one task per connection.
    ///
    /// # Errors
    ///
    /// Currently only returns if the connection limiter is closed, which
    /// nothing does; accept failures are logged and skipped.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, max_connections = self.limiter.available_permits(), "proxy listening");

        loop {
            let Ok(permit) = Arc::clone(&self.limiter).acquire_owned().await else {
                return Ok(());
            };

            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let shared = Arc::clone(&self.shared);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, &shared).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
                drop(permit);
            });
        }
    }
}

/// Handles a single client connection from first byte to close.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    shared: &Shared,
) -> Result<(), ConnectionError> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    let outcome = match read_request_head(&mut stream, &mut buf, shared).await? {
        None => {
            debug!(peer = %peer_addr, "connection closed by peer before request head");
            return Ok(());
        }
        Some(Err(e)) => {
            warn!(peer = %peer_addr, error = %e, "request rejected");
            Outcome::Rejected(e.status())
        }
        Some(Ok(request)) => dispatch(&request, peer_addr, shared).await?,
    };

    let bytes = outcome.into_bytes();
    timeout(shared.write_timeout, async {
        stream.write_all(&bytes).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| ConnectionError::ClientWriteTimeout(shared.write_timeout))??;
    stream.shutdown().await?;
    Ok(())
}

/// Reads until the request head is complete and validates it.
///
/// Returns `None` if the client closes first. The whole head must arrive
/// within `client_read_timeout`. Only newly arrived bytes are searched for
/// the terminator.
async fn read_request_head(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    shared: &Shared,
) -> Result<Option<Result<Request, RequestError>>, ConnectionError> {
    let mut scanned = 0;
    let deadline = Instant::now() + shared.client_read_timeout;

    loop {
        let bytes_read = timeout_at(deadline, stream.read_buf(buf))
            .await
            .map_err(|_| ConnectionError::ClientTimeout(shared.client_read_timeout))??;

        if bytes_read == 0 {
            return Ok(None);
        }

        if let Some(head_end) = find_header_end(buf, scanned) {
            return Ok(Some(Request::parse(&buf[..head_end]).map(|(request, _)| request)));
        }
        scanned = buf.len().saturating_sub(3);

        if buf.len() > shared.max_request_size {
            return Ok(Some(Err(RequestError::TooLarge {
                max_bytes: shared.max_request_size,
            })));
        }
    }
}

/// Routes a validated request to the control plane, the blocklist or the origin.
async fn dispatch(
    request: &Request,
    peer_addr: SocketAddr,
    shared: &Shared,
) -> Result<Outcome, ConnectionError> {
    let target = request.target();

    if control::intercept(&shared.state, target.path()) {
        return Ok(Outcome::ControlHandled);
    }

    if let Some(pattern) = shared.state.blocking_pattern(target.host()) {
        info!(peer = %peer_addr, url = %target, %pattern, "request blocked");
        return Ok(Outcome::Forbidden);
    }

    debug!(peer = %peer_addr, url = %target, "relaying request");
    let bytes = shared.relay.forward(shared.state.cache(), request).await?;
    Ok(Outcome::Relayed(bytes))
}
