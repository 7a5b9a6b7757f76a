//! HTTP/1.0 protocol types and parsing.
//!
//! This module provides the wire-level primitives the proxy speaks:
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`] and [`Target`] on the
//! client side, and [`ResponseReader`] / [`ResponseHead`] on the origin side.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;
pub mod target;

pub use headers::Headers;
pub use request::{Request, RequestError};
pub use response::{Response, ResponseHead, ResponseReader};
pub use target::Target;

/// The only protocol version the proxy accepts from clients and speaks upstream.
pub const HTTP_10: &str = "HTTP/1.0";

/// An HTTP response status code the proxy can emit on its own behalf.
///
/// Relayed origin responses are forwarded byte-for-byte and never pass
/// through this type.
///
/// # Examples
///
/// ```
/// use relay10::http::StatusCode;
///
/// let status = StatusCode::Forbidden;
/// assert_eq!(status.as_u16(), 403);
/// assert_eq!(status.canonical_reason(), "Forbidden");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    NotModified = 304,
    BadRequest = 400,
    Forbidden = 403,
    PayloadTooLarge = 413,
    NotImplemented = 501,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotModified => "Not Modified",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::NotImplemented => "Not Implemented",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// The proxy only forwards `GET`; any other token is kept verbatim so it can
/// be logged by name and answered with `501 Not Implemented`.
///
/// # Examples
///
/// ```
/// use relay10::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert!(method.is_supported());
///
/// let method: Method = "BREW".parse().unwrap();
/// assert_eq!(method.as_str(), "BREW");
/// assert!(!method.is_supported());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    /// Any other method token.
    Other(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Returns `true` if the proxy will forward requests using this method.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Method tokens are case-sensitive (RFC 1945 §5.1.1).
        Ok(match s {
            "GET" => Self::Get,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Returns the byte offset just past the first `\r\n\r\n` in `buf`, starting
/// the search at `from`.
///
/// Callers that accumulate input incrementally pass the previous buffer
/// length minus three as `from`, so bytes already scanned are not scanned again.
pub(crate) fn find_header_end(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| from + pos + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(StatusCode::NotImplemented.to_string(), "501 Not Implemented");
        assert_eq!(u16::from(StatusCode::BadRequest), 400);
    }

    #[test]
    fn method_is_case_sensitive() {
        let m: Method = "get".parse().unwrap();
        assert_eq!(m, Method::Other("get".to_owned()));
        assert!(!m.is_supported());
    }

    #[test]
    fn header_end_found_across_resume_points() {
        let buf = b"GET / HTTP/1.0\r\nA: b\r\n\r\nrest";
        assert_eq!(find_header_end(buf, 0), Some(24));
        assert_eq!(find_header_end(buf, 20), Some(24));
        assert_eq!(find_header_end(buf, 21), None);
        assert_eq!(find_header_end(b"GET / HTTP/1.0\r\n", 0), None);
        assert_eq!(find_header_end(b"ab", 10), None);
    }
}
