//! # DuDu Proxy - Dual-Protocol Forwarding Proxy
//!
//! DuDu Proxy is a forwarding proxy that accepts client connections on two
//! listeners, one speaking HTTP/1.1 (including the HTTPS `CONNECT` tunnel
//! convention) and one speaking SOCKS5 (RFC 1928 with RFC 1929 password
//! authentication). Both frontends authenticate clients against a shared
//! credential table and bidirectionally relay bytes between each authorized
//! client and its requested upstream TCP endpoint.
//!
//! ## Features
//!
//! - **Dual Frontends**: HTTP/1.1 proxy (plain forward + `CONNECT` tunnel)
//!   and SOCKS5 `CONNECT`, sharing one control plane
//! - **IP Banning**: per-IP authentication failure tracking with timed bans,
//!   periodic sweeping and JSON persistence across restarts
//! - **Rate Limiting**: global and per-IP token buckets, allocated on demand
//! - **Circuit Breaking**: sliding-window failure-rate breaker with
//!   autonomous half-open recovery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dudu_proxy::config::load_config;
//! use dudu_proxy::server::Server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("configs/config.example.json")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     let server = Server::new(config).await?;
//!     server.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! Every accepted connection passes through an ordered admission pipeline
//! (circuit breaker, IP ban, rate limit) before any protocol byte is parsed.
//! Authentication outcomes feed back into the ban tracker and the breaker,
//! so both frontends contribute to, and are protected by, the same state.
//!
//! ```text
//! Client -> [HTTP | SOCKS5 listener] -> admission -> handshake -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod middleware;
pub mod net;
pub mod proxy;
pub mod server;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::ProxyError;
pub use server::Server;

/// Version of the DuDu Proxy library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "dudu-proxy");
    }
}
