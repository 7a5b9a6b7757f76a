//! Absolute-form request targets (`http://host[:port]/path[?query]`).
//!
//! Parsing is done by [`http::Uri`]; components are read back unchanged: no
//! case folding, no percent-decoding and no dot-segment removal. The raw
//! string doubles as the cache key, so two spellings of the same resource are
//! two entries.

use std::fmt;

use http::Uri;
use http::uri::{Authority, InvalidUri};
use thiserror::Error;

/// Port used when the target names none.
pub const DEFAULT_PORT: u16 = 80;

/// Reasons a request target is rejected.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("malformed target: {0}")]
    Malformed(#[from] InvalidUri),

    #[error("target is not an absolute URL")]
    NotAbsolute,

    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("target has no host")]
    MissingHost,

    #[error("target has no path")]
    MissingPath,

    #[error("invalid port `{0}`")]
    InvalidPort(String),
}

/// A parsed absolute-form request target.
///
/// # Examples
///
/// ```
/// use relay10::http::Target;
///
/// let target = Target::parse("http://example.com:8080/a/b?x=1#frag").unwrap();
/// assert_eq!(target.host(), "example.com");
/// assert_eq!(target.port(), 8080);
/// assert_eq!(target.path(), "/a/b");
/// assert_eq!(target.query(), Some("x=1"));
/// assert_eq!(target.origin_form(), "/a/b?x=1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    raw: String,
    uri: Uri,
    host: String,
    port: Option<u16>,
}

impl Target {
    /// Parses an absolute `http://` URL.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetError`] if the text is not a URI, is not absolute,
    /// the scheme is not `http`, the host or path is empty, or the port is
    /// not a `u16`.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let uri: Uri = raw.parse()?;

        let scheme = uri.scheme_str().ok_or(TargetError::NotAbsolute)?;
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(TargetError::UnsupportedScheme(scheme.to_owned()));
        }

        let authority = uri.authority().ok_or(TargetError::MissingHost)?;
        let host = unbracket(authority.host());
        if host.is_empty() {
            return Err(TargetError::MissingHost);
        }
        let port = explicit_port(authority)?;

        // `Uri` reports `/` for an absent path, so look at what was written.
        let after_authority = scheme.len() + "://".len() + authority.as_str().len();
        if !raw.get(after_authority..).is_some_and(|rest| rest.starts_with('/')) {
            return Err(TargetError::MissingPath);
        }

        Ok(Self {
            raw: raw.to_owned(),
            host: host.to_owned(),
            port,
            uri,
        })
    }

    /// The target exactly as the client sent it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Host name or address literal, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, or [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// The port only if the client named one.
    pub fn explicit_port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path plus query, as sent on the upstream request line. The fragment
    /// never leaves the client.
    pub fn origin_form(&self) -> &str {
        self.uri
            .path_and_query()
            .map_or_else(|| self.path(), |path_and_query| path_and_query.as_str())
    }

    /// Value for the upstream `Host` header.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host)
}

/// The port written after the host, if any. An empty port means none.
fn explicit_port(authority: &Authority) -> Result<Option<u16>, TargetError> {
    let host_port = authority
        .as_str()
        .rsplit_once('@')
        .map_or(authority.as_str(), |(_, host_port)| host_port);
    let written = host_port
        .strip_prefix(authority.host())
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or_default();

    match authority.port_u16() {
        Some(port) => Ok(Some(port)),
        None if written.is_empty() => Ok(None),
        None => Err(TargetError::InvalidPort(written.to_owned())),
    }
}
