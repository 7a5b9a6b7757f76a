//! Administrative commands carried in request paths.
//!
//! | Path                                | Effect            |
//! |-------------------------------------|-------------------|
//! | `/proxy/cache/enable`               | enable caching    |
//! | `/proxy/cache/disable`              | disable caching   |
//! | `/proxy/cache/flush`                | clear the cache   |
//! | `/proxy/blocklist/enable`           | enable blocking   |
//! | `/proxy/blocklist/disable`          | disable blocking  |
//! | `/proxy/blocklist/flush`            | clear blocklist   |
//! | `/proxy/blocklist/add/<pattern>`    | add a pattern     |
//! | `/proxy/blocklist/remove/<pattern>` | remove a pattern  |
//!
//! Only the path is inspected; the host in the target is irrelevant, so
//! `http://anything/proxy/cache/flush` flushes the cache.

use tracing::{info, warn};

use crate::state::ProxyState;

const ADD_PREFIX: &str = "/proxy/blocklist/add/";
const REMOVE_PREFIX: &str = "/proxy/blocklist/remove/";

/// A recognised control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    EnableCache,
    DisableCache,
    FlushCache,
    EnableBlocklist,
    DisableBlocklist,
    FlushBlocklist,
    AddPattern(String),
    RemovePattern(String),
}

impl Command {
    /// Recognises a control path. Anything else, including near misses such
    /// as a trailing slash, yields `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay10::control::Command;
    ///
    /// assert_eq!(Command::from_path("/proxy/cache/flush"), Some(Command::FlushCache));
    /// assert_eq!(
    ///     Command::from_path("/proxy/blocklist/add/ads"),
    ///     Some(Command::AddPattern("ads".into()))
    /// );
    /// assert_eq!(Command::from_path("/proxy/cache/flush/"), None);
    /// ```
    pub fn from_path(path: &str) -> Option<Self> {
        let command = match path {
            "/proxy/cache/enable" => Self::EnableCache,
            "/proxy/cache/disable" => Self::DisableCache,
            "/proxy/cache/flush" => Self::FlushCache,
            "/proxy/blocklist/enable" => Self::EnableBlocklist,
            "/proxy/blocklist/disable" => Self::DisableBlocklist,
            "/proxy/blocklist/flush" => Self::FlushBlocklist,
            _ => {
                if let Some(pattern) = path.strip_prefix(ADD_PREFIX) {
                    Self::AddPattern(pattern.to_owned())
                } else if let Some(pattern) = path.strip_prefix(REMOVE_PREFIX) {
                    Self::RemovePattern(pattern.to_owned())
                } else {
                    return None;
                }
            }
        };
        Some(command)
    }

    /// Applies the command to the shared state.
    ///
    /// Never fails: removing an absent pattern changes nothing, and an empty
    /// pattern is ignored because it would match every host.
    pub fn apply(&self, state: &ProxyState) {
        info!(command = ?self, "control command");
        match self {
            Self::EnableCache => state.cache().enable(),
            Self::DisableCache => state.cache().disable(),
            Self::FlushCache => {
                state.cache().flush();
            }
            Self::EnableBlocklist => state.blocklist().enable(),
            Self::DisableBlocklist => state.blocklist().disable(),
            Self::FlushBlocklist => {
                state.blocklist().flush();
            }
            Self::AddPattern(pattern) if pattern.is_empty() => {
                warn!("ignoring empty blocklist pattern");
            }
            Self::AddPattern(pattern) => {
                state.blocklist().add(pattern.as_str());
            }
            Self::RemovePattern(pattern) => {
                state.blocklist().remove(pattern);
            }
        }
    }
}

/// Executes the command named by `path`, if any.
///
/// Returns `true` when `path` was a control command; state changes only then.
pub fn intercept(state: &ProxyState, path: &str) -> bool {
    match Command::from_path(path) {
        Some(command) => {
            command.apply(state);
            true
        }
        None => false,
    }
}
