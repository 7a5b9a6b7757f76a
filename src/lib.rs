//! # relay10
//!
//! A caching, host-filtering HTTP/1.0 forward proxy built on Tokio.
//!
//! Clients send absolute-form `GET` requests; the proxy validates them,
//! answers administrative `/proxy/...` commands itself, rejects blocked
//! hosts, and otherwise fetches the target from its origin, revalidating
//! cached copies with `If-Modified-Since`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay10::config::ProxyConfig;
//! use relay10::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ProxyConfig::default().port(2100)).await?;
//!     println!("Proxying on {}", server.local_addr());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod blocklist;
pub mod cache;
pub mod config;
pub mod control;
pub mod http;
pub mod relay;
pub mod server;
pub mod state;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::ProxyConfig;
pub use http::{Request, RequestError, StatusCode};
pub use relay::RelayError;
pub use server::{Server, ServerError};
pub use state::ProxyState;
