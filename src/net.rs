//! Outbound dialing and host/port utilities
//!
//! All target-address handling goes through this module so that IPv6
//! literals are always bracket-joined and the configured network family is
//! honored on every outbound dial, not just on the listeners.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Timeout applied to every outbound dial
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Address-family restriction for socket operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkFamily {
    /// Dual stack, no restriction
    #[default]
    Tcp,
    /// IPv4 only
    Tcp4,
    /// IPv6 only
    Tcp6,
}

impl NetworkFamily {
    /// Whether a resolved address is usable under this family
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            NetworkFamily::Tcp => true,
            NetworkFamily::Tcp4 => addr.is_ipv4(),
            NetworkFamily::Tcp6 => addr.is_ipv6(),
        }
    }

    /// Wildcard listener address for this family
    pub fn listen_addr(&self, port: u16) -> SocketAddr {
        match self {
            NetworkFamily::Tcp6 => SocketAddr::new(IpAddr::from([0u16; 8]), port),
            _ => SocketAddr::new(IpAddr::from([0u8; 4]), port),
        }
    }
}

impl std::fmt::Display for NetworkFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkFamily::Tcp => write!(f, "tcp"),
            NetworkFamily::Tcp4 => write!(f, "tcp4"),
            NetworkFamily::Tcp6 => write!(f, "tcp6"),
        }
    }
}

/// Join a host and port into a dialable/display string
///
/// Raw IPv6 literals contain colons, so they are wrapped in brackets;
/// naive `host + ":" + port` concatenation would produce an unresolvable
/// address like `::1:443`.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Split a `host:port` string, understanding bracketed IPv6 literals
///
/// Returns `None` when no port is present (callers supply a default).
pub fn split_host_port(target: &str) -> Option<(String, u16)> {
    if let Some(rest) = target.strip_prefix('[') {
        // [v6]:port
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?.parse().ok()?;
        return Some((host.to_string(), port));
    }

    // A bare IPv6 literal has multiple colons and no port to split off.
    if target.matches(':').count() > 1 {
        return None;
    }

    let (host, port) = target.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}

/// Extract the client IP (port stripped) from an accepted peer address
pub fn client_ip(peer: SocketAddr) -> String {
    peer.ip().to_string()
}

/// Dial a target, honoring the configured network family
///
/// The host is resolved, candidates not matching the family are discarded,
/// and the remainder are attempted in resolver order under one overall
/// [`DIAL_TIMEOUT`]. When resolution yields no address of the required
/// family the dial fails with [`io::ErrorKind::AddrNotAvailable`].
pub async fn dial(family: NetworkFamily, host: &str, port: u16) -> io::Result<TcpStream> {
    match tokio::time::timeout(DIAL_TIMEOUT, dial_candidates(family, host, port)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {} timed out", join_host_port(host, port)),
        )),
    }
}

async fn dial_candidates(
    family: NetworkFamily,
    host: &str,
    port: u16,
) -> io::Result<TcpStream> {
    let candidates: Vec<SocketAddr> = lookup_host((host, port))
        .await?
        .filter(|addr| family.matches(addr))
        .collect();

    if candidates.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!(
                "no {} address for {}",
                family,
                join_host_port(host, port)
            ),
        ));
    }

    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Dial attempt to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    // candidates was non-empty, so at least one attempt ran
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable address")
    }))
}
