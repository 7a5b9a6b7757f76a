//! Upstream relay: rewrite the client's request, fetch the origin response,
//! and apply conditional-cache rules to what comes back.

use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStore};
use crate::config::ProxyConfig;
use crate::http::response::{OriginResponse, Progress, ResponseError, ResponseReader};
use crate::http::{HTTP_10, Request, StatusCode};

/// Size of each read from the origin socket.
const READ_CHUNK: usize = 8 * 1024;

/// Failures talking to an origin. None of them produce a client response;
/// the connection is simply closed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {after:?} while {phase}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unusable origin response: {0}")]
    Response(#[from] ResponseError),
}

/// Forwards validated requests to their origin, one connection per request.
#[derive(Debug, Clone)]
pub struct UpstreamRelay {
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    max_response_size: usize,
}

impl UpstreamRelay {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.upstream_read_timeout,
            write_timeout: config.write_timeout,
            max_response_size: config.max_response_size,
        }
    }

    /// Fetches `request` from its origin and returns the bytes owed to the client.
    ///
    /// With caching on and an entry for the target, the request carries
    /// `If-Modified-Since`; a `304` answer is then replaced by the stored
    /// response. A `200` carrying `Date` refreshes the entry.
    ///
    /// # Errors
    ///
    /// Any [`RelayError`]: connect failure, timeout, I/O error, or an origin
    /// response that cannot be framed.
    pub async fn forward(&self, cache: &CacheStore, request: &Request) -> Result<Bytes, RelayError> {
        let target = request.target();
        let key = target.as_str();

        let cached = if cache.is_enabled() { cache.get(key) } else { None };
        let outbound = build_upstream_request(request, cached.as_ref().map(CacheEntry::last_modified));

        let addr = format!("{}:{}", target.host_header(), target.port());
        let mut stream = match timeout(
            self.connect_timeout,
            TcpStream::connect((target.host(), target.port())),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(RelayError::Connect { addr, source }),
            Err(_) => {
                return Err(RelayError::Timeout {
                    phase: "connecting to origin",
                    after: self.connect_timeout,
                });
            }
        };
        debug!(%addr, conditional = cached.is_some(), "connected to origin");

        timeout(self.write_timeout, async {
            stream.write_all(&outbound).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| RelayError::Timeout {
            phase: "sending request to origin",
            after: self.write_timeout,
        })??;

        let response = self.read_response(&mut stream).await?;
        debug!(%addr, status = response.status(), bytes = response.bytes().len(), "origin responded");

        Ok(settle(cache, key, cached, response))
    }

    async fn read_response(&self, stream: &mut TcpStream) -> Result<OriginResponse, RelayError> {
        let mut reader = ResponseReader::new(self.max_response_size);
        let mut chunk = BytesMut::with_capacity(READ_CHUNK);

        loop {
            chunk.clear();
            let read = timeout(self.read_timeout, stream.read_buf(&mut chunk))
                .await
                .map_err(|_| RelayError::Timeout {
                    phase: "reading origin response",
                    after: self.read_timeout,
                })??;

            // Origin closed: fine for close-delimited bodies, truncation otherwise.
            if read == 0 {
                return Ok(reader.finish()?);
            }
            if reader.feed(&chunk)? == Progress::Complete {
                return Ok(reader.finish()?);
            }
        }
    }
}

/// Serializes the request sent to the origin.
///
/// The request line is rewritten to origin form against `HTTP/1.0`, followed
/// by `Host`, a forced `Connection: close`, every client header except
/// `Connection` in arrival order, and `If-Modified-Since` when revalidating.
pub fn build_upstream_request(request: &Request, if_modified_since: Option<&Bytes>) -> BytesMut {
    let target = request.target();
    let mut buf = BytesMut::with_capacity(256 + request.headers().len() * 64);

    buf.put(format!("GET {} {HTTP_10}\r\n", target.origin_form()).as_bytes());
    buf.put(format!("Host: {}\r\n", target.host_header()).as_bytes());
    buf.put(&b"Connection: close\r\n"[..]);

    for (name, value) in request.headers().without("connection") {
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }

    if let Some(marker) = if_modified_since {
        buf.put(&b"If-Modified-Since: "[..]);
        buf.put(marker.as_ref());
        buf.put(&b"\r\n"[..]);
    }

    buf.put(&b"\r\n"[..]);
    buf
}

/// Applies the cache rules to a fresh origin response.
fn settle(cache: &CacheStore, key: &str, cached: Option<CacheEntry>, response: OriginResponse) -> Bytes {
    let status = response.status();

    if status == StatusCode::NotModified.as_u16() {
        // The snapshot taken when the conditional header was added; a later
        // flush does not invalidate the answer to this request.
        if let Some(entry) = cached {
            debug!(url = %key, "origin confirmed cached copy");
            return entry.response().clone();
        }
        return response.into_bytes();
    }

    if status == StatusCode::Ok.as_u16() && cache.is_enabled() {
        if let Some(date) = response.head().date().cloned() {
            cache.insert(key, CacheEntry::new(date, response.bytes().clone()));
        } else {
            debug!(url = %key, "200 without Date, not cached");
        }
    }

    response.into_bytes()
}
