//! Ordered header list for client requests.
//!
//! A forward proxy has to replay the client's headers to the origin in the
//! order they arrived, duplicates included, so headers are kept as a plain
//! list of pairs rather than a map.

use std::fmt;

/// An ordered, multi-value list of request headers with case-insensitive lookup.
///
/// # Examples
///
/// ```
/// use relay10::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept", "text/html");
/// headers.insert("Connection", "keep-alive");
/// headers.insert("Accept", "*/*");
///
/// assert_eq!(headers.get("accept"), Some("text/html"));
/// let forwarded: Vec<_> = headers.without("connection").map(|(n, _)| n).collect();
/// assert_eq!(forwarded, vec!["Accept", "Accept"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header. Earlier entries with the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if at least one entry is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns every `(name, value)` pair whose name is not `excluded`, in
    /// arrival order.
    pub fn without<'a>(&'a self, excluded: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.iter().filter(move |(k, _)| !k.eq_ignore_ascii_case(excluded))
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns all `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
