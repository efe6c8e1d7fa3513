//! Protocol frontends
//!
//! The HTTP/1.1 and SOCKS5 frontends share the admission pipeline, the
//! credential table and the relay; each implements its own handshake on a
//! generic stream so tests can drive them over in-memory pipes.

mod http;
mod relay;
mod socks5;

pub use http::HttpProxy;
pub use relay::relay;
pub use socks5::Socks5Proxy;

use anyhow::Result;
use tokio::net::TcpStream;

/// Common interface the server orchestrator uses to run a frontend
#[async_trait::async_trait]
pub trait ProxyService: Send + Sync {
    /// Protocol name, used in logs
    fn name(&self) -> &'static str;

    /// Handle one accepted client connection
    async fn handle(&self, stream: TcpStream, client_ip: String) -> Result<()>;
}
