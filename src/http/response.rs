//! Response handling in both directions.
//!
//! - [`Response`] builds the bare status lines the proxy answers with on its
//!   own behalf (control commands and rejections).
//! - [`ResponseReader`] incrementally frames an origin response, tracking the
//!   header boundary and the body bytes still owed so nothing is rescanned.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{HTTP_10, StatusCode, find_header_end};

/// A response generated by the proxy itself.
///
/// Carries a status line and nothing else: no headers, no body.
///
/// # Examples
///
/// ```
/// use relay10::http::{Response, StatusCode};
///
/// let bytes = Response::new(StatusCode::Forbidden).into_bytes();
/// assert_eq!(&bytes[..], b"HTTP/1.0 403 Forbidden\r\n\r\n");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Serializes the status line followed by the empty header terminator.
    pub fn into_bytes(self) -> BytesMut {
        let line = format!("{HTTP_10} {}\r\n\r\n", self.status);
        let mut buf = BytesMut::with_capacity(line.len());
        buf.put(line.as_bytes());
        buf
    }
}

/// Errors raised while framing an origin response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("malformed response head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("response head is incomplete")]
    IncompleteHead,

    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),

    #[error("origin closed after {received} body bytes, expected {expected}")]
    Truncated { expected: usize, received: usize },

    #[error("response exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

/// The parts of an origin response head the proxy acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: u16,
    content_length: Option<usize>,
    date: Option<Bytes>,
    head_len: usize,
}

impl ResponseHead {
    /// Header slots tried first; larger heads are reparsed with room for every line.
    const MAX_HEADERS: usize = 64;

    /// Parses a complete response head (terminator included).
    ///
    /// Origins are parsed leniently: spaces before a header colon, folded
    /// header lines and runs of spaces in the status line are all accepted,
    /// and there is no fixed cap on the number of headers.
    ///
    /// # Errors
    ///
    /// [`ResponseError::Parse`] if `httparse` rejects the head,
    /// [`ResponseError::IncompleteHead`] if the terminator is missing, and
    /// [`ResponseError::InvalidContentLength`] for a non-numeric length.
    pub fn parse(head: &[u8]) -> Result<Self, ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        match Self::parse_into(head, &mut headers) {
            Err(ResponseError::Parse(httparse::Error::TooManyHeaders)) => {
                // Every header line takes at least three bytes (`a:\n`).
                let mut headers = vec![httparse::EMPTY_HEADER; head.len() / 3 + 1];
                Self::parse_into(head, &mut headers)
            }
            parsed => parsed,
        }
    }

    fn parse_into<'b>(head: &'b [u8], headers: &mut [httparse::Header<'b>]) -> Result<Self, ResponseError> {
        let mut raw = httparse::Response::new(headers);
        let head_len = match origin_parser().parse_response(&mut raw, head)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(ResponseError::IncompleteHead),
        };
        let status = raw.code.ok_or(ResponseError::IncompleteHead)?;

        let mut content_length = None;
        let mut date = None;
        for header in raw.headers.iter() {
            if header.name.eq_ignore_ascii_case("content-length") {
                let value = String::from_utf8_lossy(header.value);
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ResponseError::InvalidContentLength(value.clone().into_owned()))?;
                content_length = Some(parsed);
            } else if header.name.eq_ignore_ascii_case("date") && date.is_none() {
                date = Some(Bytes::copy_from_slice(header.value));
            }
        }

        Ok(Self {
            status,
            content_length,
            date,
            head_len,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// The raw `Date` header value, used as the revalidation marker.
    pub fn date(&self) -> Option<&Bytes> {
        self.date.as_ref()
    }

    /// Length of the head in bytes, terminator included.
    pub fn head_len(&self) -> usize {
        self.head_len
    }

    /// Responses that never carry a body regardless of their headers.
    fn is_bodiless(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

/// Parser settings for origin heads, which are relayed as long as they frame.
fn origin_parser() -> httparse::ParserConfig {
    let mut config = httparse::ParserConfig::default();
    config
        .allow_spaces_after_header_name_in_responses(true)
        .allow_obsolete_multiline_headers_in_responses(true)
        .allow_multiple_spaces_in_response_status_delimiters(true);
    config
}

/// A complete origin response: the parsed head plus every wire byte.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    head: ResponseHead,
    bytes: Bytes,
}

impl OriginResponse {
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn status(&self) -> u16 {
        self.head.status
    }

    /// Status line, headers and body exactly as the origin sent them.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    AwaitHead { scanned: usize },
    Remaining(usize),
    UntilClose,
    Done,
}

/// Progress reported by [`ResponseReader::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    NeedMore,
    Complete,
}

/// Incremental framer for an origin response.
///
/// Bytes are appended with [`feed`](Self::feed). Until the head terminator
/// shows up only the newly arrived bytes (plus a three-byte overlap) are
/// searched; afterwards only a remaining-bytes counter is updated.
///
/// Body framing follows HTTP/1.0: `Content-Length` when present, nothing for
/// `1xx`, `204` and `304`, otherwise everything up to connection close.
///
/// # Examples
///
/// ```
/// use relay10::http::response::{Progress, ResponseReader};
///
/// let mut reader = ResponseReader::new(1024);
/// assert_eq!(reader.feed(b"HTTP/1.0 200 OK\r\nContent-Len").unwrap(), Progress::NeedMore);
/// assert_eq!(reader.feed(b"gth: 2\r\n\r\nhi").unwrap(), Progress::Complete);
/// let response = reader.finish().unwrap();
/// assert_eq!(response.status(), 200);
/// assert!(response.bytes().ends_with(b"\r\n\r\nhi"));
/// ```
#[derive(Debug)]
pub struct ResponseReader {
    buf: BytesMut,
    framing: Framing,
    head: Option<ResponseHead>,
    max_bytes: usize,
}

impl ResponseReader {
    const INITIAL_BUF_SIZE: usize = 4096;

    /// Creates a reader that refuses responses larger than `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(Self::INITIAL_BUF_SIZE.min(max_bytes)),
            framing: Framing::AwaitHead { scanned: 0 },
            head: None,
            max_bytes,
        }
    }

    /// Appends freshly read bytes and advances the framing state.
    ///
    /// Bytes arriving after a `Content-Length` body is complete are dropped.
    ///
    /// # Errors
    ///
    /// Head parse failures and [`ResponseError::TooLarge`].
    pub fn feed(&mut self, data: &[u8]) -> Result<Progress, ResponseError> {
        match self.framing {
            Framing::Done => return Ok(Progress::Complete),
            Framing::Remaining(remaining) => {
                let take = remaining.min(data.len());
                self.append(&data[..take])?;
                self.framing = match remaining - take {
                    0 => Framing::Done,
                    left => Framing::Remaining(left),
                };
            }
            Framing::UntilClose => self.append(data)?,
            Framing::AwaitHead { scanned } => {
                self.append(data)?;
                match find_header_end(&self.buf, scanned) {
                    Some(head_end) => self.on_head(head_end)?,
                    None => {
                        let scanned = self.buf.len().saturating_sub(3);
                        self.framing = Framing::AwaitHead { scanned };
                    }
                }
            }
        }

        Ok(match self.framing {
            Framing::Done => Progress::Complete,
            _ => Progress::NeedMore,
        })
    }

    /// Consumes the reader once the body is complete or the origin has closed.
    ///
    /// # Errors
    ///
    /// [`ResponseError::IncompleteHead`] if the head never finished and
    /// [`ResponseError::Truncated`] if fewer than `Content-Length` body bytes
    /// arrived.
    pub fn finish(self) -> Result<OriginResponse, ResponseError> {
        let head = self.head.ok_or(ResponseError::IncompleteHead)?;
        match self.framing {
            Framing::Done | Framing::UntilClose => Ok(OriginResponse {
                head,
                bytes: self.buf.freeze(),
            }),
            Framing::Remaining(remaining) => {
                let expected = head.content_length.unwrap_or_default();
                Err(ResponseError::Truncated {
                    expected,
                    received: expected - remaining,
                })
            }
            Framing::AwaitHead { .. } => Err(ResponseError::IncompleteHead),
        }
    }

    fn append(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        if self.buf.len() + data.len() > self.max_bytes {
            return Err(ResponseError::TooLarge {
                max_bytes: self.max_bytes,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn on_head(&mut self, head_end: usize) -> Result<(), ResponseError> {
        let head = ResponseHead::parse(&self.buf[..head_end])?;
        let body_so_far = self.buf.len() - head_end;

        self.framing = if head.is_bodiless() {
            self.buf.truncate(head_end);
            Framing::Done
        } else {
            match head.content_length {
                Some(len) if body_so_far >= len => {
                    self.buf.truncate(head_end + len);
                    Framing::Done
                }
                Some(len) => Framing::Remaining(len - body_so_far),
                None => Framing::UntilClose,
            }
        };
        self.head = Some(head);
        Ok(())
    }
}
