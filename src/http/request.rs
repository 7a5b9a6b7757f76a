//! Client request validation.
//!
//! A request head is checked in a fixed order so that the status code a
//! client sees is deterministic:
//!
//! 1. the request line has exactly three whitespace-separated fields (`400`);
//! 2. the method is `GET` (`501`);
//! 3. the target is an absolute `http://` URL with a host and a path (`400`);
//! 4. the version is exactly `HTTP/1.0` (`400`);
//! 5. control commands are accepted without looking at the headers;
//! 6. every other header line is `Name: value` with no whitespace in the name (`400`).

use std::str;

use thiserror::Error;

use super::target::{Target, TargetError};
use super::{HTTP_10, Headers, Method, StatusCode, find_header_end};
use crate::control::Command;

/// Errors that can occur while validating a client request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head is incomplete, more data needed")]
    Incomplete,

    #[error("request line must have exactly three fields, found {found}")]
    MalformedRequestLine { found: usize },

    #[error("method `{0}` is not implemented")]
    UnsupportedMethod(Method),

    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetError),

    #[error("unsupported version `{0}`")]
    UnsupportedVersion(String),

    #[error("malformed header line `{0}`")]
    MalformedHeader(String),

    #[error("request head is not valid UTF-8: {0}")]
    NotUtf8(#[from] str::Utf8Error),

    #[error("request head exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

impl RequestError {
    /// The status line a client receives for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMethod(_) => StatusCode::NotImplemented,
            Self::TooLarge { .. } => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

/// A validated client request.
///
/// # Examples
///
/// ```
/// use relay10::http::Request;
///
/// let raw = b"GET http://example.com/index.html HTTP/1.0\r\nAccept: */*\r\n\r\n";
/// let (request, head_len) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.target().host(), "example.com");
/// assert_eq!(request.target().path(), "/index.html");
/// assert_eq!(request.target().port(), 80);
/// assert_eq!(request.headers().get("accept"), Some("*/*"));
/// assert_eq!(head_len, raw.len());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: Target,
    version: String,
    headers: Headers,
    command: Option<Command>,
}

impl Request {
    /// Validates the request head at the start of `buf`.
    ///
    /// Returns the request and the length of the head, terminator included.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if `buf` holds no `\r\n\r\n` yet.
    /// - Any other variant if the head breaks one of the rules in the module
    ///   docs; [`RequestError::status`] gives the matching status code.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let head_len = find_header_end(buf, 0).ok_or(RequestError::Incomplete)?;
        let head = str::from_utf8(&buf[..head_len])?;

        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();

        let fields: Vec<&str> = request_line.split_whitespace().collect();
        let &[method, target, version] = fields.as_slice() else {
            return Err(RequestError::MalformedRequestLine {
                found: fields.len(),
            });
        };

        let method: Method = match method.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        };
        if !method.is_supported() {
            return Err(RequestError::UnsupportedMethod(method));
        }

        let target = Target::parse(target)?;

        if version != HTTP_10 {
            return Err(RequestError::UnsupportedVersion(version.to_owned()));
        }

        let command = Command::from_path(target.path());

        let mut headers = Headers::new();
        for line in lines.filter(|line| !line.is_empty()) {
            match split_header(line) {
                Some((name, value)) => headers.insert(name, value),
                // Control commands never reach an origin, so their headers are not vetted.
                None if command.is_some() => {}
                None => return Err(RequestError::MalformedHeader(line.to_owned())),
            }
        }

        Ok((
            Self {
                method,
                target,
                version: version.to_owned(),
                headers,
                command,
            },
            head_len,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute target; also the cache key.
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Headers in arrival order, duplicates included.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The administrative command this request names, if any.
    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }
}

/// Splits `Name: value` on the single `": "` separator.
///
/// A second `": "` anywhere in the line, or whitespace inside the name,
/// makes the line malformed.
fn split_header(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(": ");
    let name = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() || name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, value))
}
