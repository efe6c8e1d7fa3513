//! SOCKS5 proxy frontend
//!
//! Implements the server side of RFC 1928 with RFC 1929 username/password
//! authentication, `CONNECT` only. Admission rejections close the
//! connection silently since no handshake has begun.

mod consts;

use super::{relay, ProxyService};
use crate::middleware::{Admission, AuthMiddleware, Rejection};
use crate::net::{self, NetworkFamily};
use anyhow::{bail, Context, Result};
use consts::*;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// SOCKS5 proxy frontend
pub struct Socks5Proxy {
    family: NetworkFamily,
    admission: Admission,
    auth: AuthMiddleware,
}

impl Socks5Proxy {
    /// Create the SOCKS5 frontend
    pub fn new(family: NetworkFamily, admission: Admission, auth: AuthMiddleware) -> Self {
        Socks5Proxy {
            family,
            admission,
            auth,
        }
    }

    /// Handle one client connection
    pub async fn handle_conn<S>(&self, mut stream: S, client_ip: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if let Err(rejection) = self.admission.check(client_ip) {
            match rejection {
                Rejection::BreakerOpen => warn!(
                    "SOCKS5 request rejected: circuit breaker is open client_ip={} state={}",
                    client_ip,
                    self.admission.breaker_state()
                ),
                Rejection::Banned => warn!(
                    "SOCKS5 request rejected: IP is banned client_ip={}",
                    client_ip
                ),
                Rejection::RateLimited => warn!(
                    "SOCKS5 request rejected: rate limit exceeded client_ip={}",
                    client_ip
                ),
            }
            return Ok(());
        }

        self.handshake(&mut stream, client_ip).await?;
        self.handle_request(stream, client_ip).await
    }

    /// Greeting and method selection, plus the password sub-negotiation
    /// when required
    async fn handshake<S>(&self, stream: &mut S, client_ip: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = [0u8; 2];
        stream
            .read_exact(&mut buf)
            .await
            .with_context(|| "failed to read greeting")?;

        let version = buf[0];
        let n_methods = buf[1] as usize;

        if version != SOCKS5_VERSION {
            bail!("unsupported SOCKS version: {}", version);
        }

        let mut methods = vec![0u8; n_methods];
        stream
            .read_exact(&mut methods)
            .await
            .with_context(|| "failed to read methods")?;

        let selected = if self.auth.is_enabled() {
            if methods.contains(&AUTH_METHOD_PASSWORD) {
                AUTH_METHOD_PASSWORD
            } else {
                AUTH_METHOD_NOT_ACCEPTABLE
            }
        } else if methods.contains(&AUTH_METHOD_NONE) {
            AUTH_METHOD_NONE
        } else {
            AUTH_METHOD_NOT_ACCEPTABLE
        };

        stream.write_all(&[SOCKS5_VERSION, selected]).await?;
        stream.flush().await?;

        if selected == AUTH_METHOD_NOT_ACCEPTABLE {
            bail!("no acceptable authentication method");
        }

        if selected == AUTH_METHOD_PASSWORD {
            self.authenticate_password(stream, client_ip).await?;
        }

        Ok(())
    }

    /// RFC 1929 username/password sub-negotiation
    ///
    /// The outcome is fed into the ban tracker and the circuit breaker
    /// before the status byte is written.
    async fn authenticate_password<S>(&self, stream: &mut S, client_ip: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = [0u8; 2];
        stream
            .read_exact(&mut buf)
            .await
            .with_context(|| "failed to read auth header")?;

        let auth_version = buf[0];
        if auth_version != SOCKS5_AUTH_VERSION {
            bail!("unsupported auth version: {}", auth_version);
        }

        let mut username = vec![0u8; buf[1] as usize];
        stream
            .read_exact(&mut username)
            .await
            .with_context(|| "failed to read username")?;

        let mut len_buf = [0u8; 1];
        stream
            .read_exact(&mut len_buf)
            .await
            .with_context(|| "failed to read password length")?;

        let mut password = vec![0u8; len_buf[0] as usize];
        stream
            .read_exact(&mut password)
            .await
            .with_context(|| "failed to read password")?;

        // Non-UTF8 bytes cannot match any configured credential, so a lossy
        // conversion preserves the accept/reject outcome
        let username = String::from_utf8_lossy(&username).into_owned();
        let password = String::from_utf8_lossy(&password).into_owned();

        let authenticated = self.auth.authenticate(&username, &password);
        let status = if authenticated {
            self.admission.record_auth_success(client_ip);
            debug!(
                "SOCKS5 authentication successful: client_ip={} username={}",
                client_ip, username
            );
            AUTH_STATUS_SUCCESS
        } else {
            self.admission.record_auth_failure(client_ip);
            warn!(
                "SOCKS5 authentication failed: client_ip={} username={}",
                client_ip, username
            );
            AUTH_STATUS_FAILURE
        };

        stream
            .write_all(&[SOCKS5_AUTH_VERSION, status])
            .await?;
        stream.flush().await?;

        if !authenticated {
            bail!("authentication failed");
        }

        Ok(())
    }

    /// Parse the CONNECT request, dial the target and relay
    async fn handle_request<S>(&self, mut stream: S, client_ip: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .await
            .with_context(|| "failed to read request")?;

        let version = header[0];
        let cmd = header[1];
        // header[2] is reserved
        let atyp = header[3];

        if version != SOCKS5_VERSION {
            send_reply(&mut stream, REPLY_GENERAL_FAILURE).await?;
            bail!("invalid version in request: {}", version);
        }

        if cmd != CMD_CONNECT {
            send_reply(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
            bail!("unsupported command: {}", cmd);
        }

        let host = match atyp {
            ATYP_IPV4 => {
                let mut addr = [0u8; 4];
                stream.read_exact(&mut addr).await?;
                Ipv4Addr::from(addr).to_string()
            }
            ATYP_DOMAIN => {
                let mut len_buf = [0u8; 1];
                stream.read_exact(&mut len_buf).await?;
                let len = len_buf[0] as usize;
                if len == 0 {
                    send_reply(&mut stream, REPLY_GENERAL_FAILURE).await?;
                    bail!("empty domain name");
                }
                let mut domain = vec![0u8; len];
                stream.read_exact(&mut domain).await?;
                match String::from_utf8(domain) {
                    Ok(domain) => domain,
                    Err(_) => {
                        send_reply(&mut stream, REPLY_GENERAL_FAILURE).await?;
                        bail!("invalid domain name");
                    }
                }
            }
            ATYP_IPV6 => {
                let mut addr = [0u8; 16];
                stream.read_exact(&mut addr).await?;
                Ipv6Addr::from(addr).to_string()
            }
            other => {
                send_reply(&mut stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                bail!("unsupported address type: {}", other);
            }
        };

        let mut port_buf = [0u8; 2];
        stream.read_exact(&mut port_buf).await?;
        let port = u16::from_be_bytes(port_buf);

        let upstream = match net::dial(self.family, &host, port).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(
                    "Failed to connect to target: client_ip={} target={} error={}",
                    client_ip,
                    net::join_host_port(&host, port),
                    e
                );
                let code = match e.kind() {
                    std::io::ErrorKind::AddrNotAvailable
                    | std::io::ErrorKind::InvalidInput => REPLY_GENERAL_FAILURE,
                    _ => REPLY_HOST_UNREACHABLE,
                };
                send_reply(&mut stream, code).await?;
                bail!("failed to connect to target: {}", e);
            }
        };

        send_reply(&mut stream, REPLY_SUCCEEDED).await?;

        info!(
            "SOCKS5 connection established: client_ip={} target={}",
            client_ip,
            net::join_host_port(&host, port)
        );

        relay(stream, upstream).await
    }
}

#[async_trait::async_trait]
impl ProxyService for Socks5Proxy {
    fn name(&self) -> &'static str {
        "socks5"
    }

    async fn handle(&self, stream: TcpStream, client_ip: String) -> Result<()> {
        self.handle_conn(stream, &client_ip).await
    }
}

/// Write a reply with a zero-filled IPv4 bind address
///
/// Not RFC-strict but interoperable; clients only act on the reply code.
async fn send_reply<S>(stream: &mut S, code: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = [
        SOCKS5_VERSION,
        code,
        RESERVED,
        ATYP_IPV4,
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}
