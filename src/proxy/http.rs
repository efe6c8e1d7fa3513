//! HTTP/1.1 proxy frontend
//!
//! Handles plain forwarded requests and the HTTPS `CONNECT` tunnel
//! convention. The request head is read and parsed once; everything after
//! it is opaque bytes handed to the relay.

use super::{relay, ProxyService};
use crate::middleware::{Admission, AuthMiddleware, Rejection};
use crate::net::{self, NetworkFamily};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use httparse::{Request, Status, EMPTY_HEADER};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Upper bound on the request head
const MAX_HEAD_BYTES: usize = 32 * 1024;
/// Upper bound on parsed header count
const MAX_HEADERS: usize = 64;

/// The authentication realm presented in 407 responses
const AUTH_REALM: &str = "DuDu Proxy";

/// HTTP/1.1 proxy frontend
pub struct HttpProxy {
    family: NetworkFamily,
    admission: Admission,
    auth: AuthMiddleware,
}

/// A parsed request head plus any bytes read past it
struct RequestHead {
    method: String,
    uri: String,
    headers: Vec<(String, Vec<u8>)>,
    head_len: usize,
    buf: BytesMut,
}

impl RequestHead {
    /// Case-insensitive header lookup
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Bytes read beyond the head (start of a request body)
    fn leftover(&self) -> &[u8] {
        &self.buf[self.head_len..]
    }
}

impl HttpProxy {
    /// Create the HTTP frontend
    pub fn new(family: NetworkFamily, admission: Admission, auth: AuthMiddleware) -> Self {
        HttpProxy {
            family,
            admission,
            auth,
        }
    }

    /// Handle one client connection
    ///
    /// Admission runs before the first byte is read. Errors while reading
    /// the initial request close the connection silently.
    pub async fn handle_conn<S>(&self, mut stream: S, client_ip: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if let Err(rejection) = self.admission.check(client_ip) {
            return self.reject(&mut stream, client_ip, rejection).await;
        }

        let head = match read_request_head(&mut stream).await {
            Ok(head) => head,
            Err(e) => {
                debug!("Failed to read request from {}: {:#}", client_ip, e);
                return Ok(());
            }
        };

        if self.auth.is_enabled() {
            let credentials = parse_proxy_auth(&head);
            let authenticated = credentials
                .as_ref()
                .map_or(false, |(user, pass)| self.auth.authenticate(user, pass));

            if !authenticated {
                let username = credentials.map(|(user, _)| user).unwrap_or_default();
                warn!(
                    "Authentication failed: client_ip={} username={}",
                    client_ip, username
                );
                self.admission.record_auth_failure(client_ip);
                send_proxy_auth_required(&mut stream).await?;
                return Ok(());
            }

            debug!("Authentication successful: client_ip={}", client_ip);
            self.admission.record_auth_success(client_ip);
        }

        if head.method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(stream, head, client_ip).await
        } else {
            self.handle_forward(stream, head, client_ip).await
        }
    }

    /// Establish an opaque tunnel for a `CONNECT` request
    async fn handle_connect<S>(
        &self,
        mut stream: S,
        head: RequestHead,
        client_ip: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some((host, port)) = net::split_host_port(&head.uri) else {
            warn!(
                "CONNECT target is not host:port: client_ip={} target={}",
                client_ip, head.uri
            );
            send_error(&mut stream, 400, "CONNECT target must be host:port").await?;
            return Ok(());
        };

        let mut upstream = match net::dial(self.family, &host, port).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(
                    "Failed to connect to target: client_ip={} target={} error={}",
                    client_ip,
                    net::join_host_port(&host, port),
                    e
                );
                send_error(&mut stream, 502, "Failed to connect to target").await?;
                return Ok(());
            }
        };

        stream
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;

        info!(
            "HTTPS tunnel established: client_ip={} target={}",
            client_ip,
            net::join_host_port(&host, port)
        );

        let leftover = head.leftover();
        if !leftover.is_empty() {
            upstream.write_all(leftover).await?;
        }

        relay(stream, upstream).await
    }

    /// Forward a plain HTTP request and copy the response back
    async fn handle_forward<S>(
        &self,
        mut stream: S,
        head: RequestHead,
        client_ip: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some((host, port, path)) = forward_target(&head) else {
            warn!("HTTP request missing host: client_ip={}", client_ip);
            send_error(&mut stream, 400, "HTTP request missing host").await?;
            return Ok(());
        };

        let mut upstream = match net::dial(self.family, &host, port).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(
                    "Failed to connect to target: client_ip={} target={} error={}",
                    client_ip,
                    net::join_host_port(&host, port),
                    e
                );
                send_error(&mut stream, 502, "Failed to connect to target").await?;
                return Ok(());
            }
        };

        let rewritten = rewrite_request(&head, &host, port, &path);
        upstream.write_all(&rewritten).await?;
        let leftover = head.leftover();
        if !leftover.is_empty() {
            upstream.write_all(leftover).await?;
        }

        info!(
            "HTTP request proxied: client_ip={} method={} target={}",
            client_ip,
            head.method,
            net::join_host_port(&host, port)
        );

        relay(stream, upstream).await
    }

    async fn reject<S>(
        &self,
        stream: &mut S,
        client_ip: &str,
        rejection: Rejection,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match rejection {
            Rejection::BreakerOpen => {
                warn!(
                    "Request rejected: circuit breaker is open client_ip={} state={}",
                    client_ip,
                    self.admission.breaker_state()
                );
                send_error(stream, 503, "Service temporarily unavailable").await
            }
            Rejection::Banned => {
                warn!("Request rejected: IP is banned client_ip={}", client_ip);
                send_error(stream, 403, "Access denied").await
            }
            Rejection::RateLimited => {
                warn!(
                    "Request rejected: rate limit exceeded client_ip={}",
                    client_ip
                );
                send_error(stream, 429, "Too many requests").await
            }
        }
    }
}

#[async_trait::async_trait]
impl ProxyService for HttpProxy {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn handle(&self, stream: TcpStream, client_ip: String) -> Result<()> {
        self.handle_conn(stream, &client_ip).await
    }
}

/// Accumulate and parse one request head
async fn read_request_head<S>(stream: &mut S) -> Result<RequestHead>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    while find_head_end(&buf).is_none() {
        if buf.len() >= MAX_HEAD_BYTES {
            bail!("request head too large");
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            bail!("connection closed before request head");
        }
    }

    let mut header_storage = [EMPTY_HEADER; MAX_HEADERS];
    let mut request = Request::new(&mut header_storage);
    let head_len = match request.parse(&buf) {
        Ok(Status::Complete(len)) => len,
        Ok(Status::Partial) => bail!("incomplete request head"),
        Err(e) => bail!("malformed request: {}", e),
    };

    let method = request.method.context("missing method")?.to_string();
    let uri = request.path.context("missing request target")?.to_string();
    let headers = request
        .headers
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect();

    Ok(RequestHead {
        method,
        uri,
        headers,
        head_len,
        buf,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Decode the `Proxy-Authorization: Basic` header into credentials
fn parse_proxy_auth(head: &RequestHead) -> Option<(String, String)> {
    let value = head.header("proxy-authorization")?;
    let value = std::str::from_utf8(value).ok()?.trim();

    const PREFIX: &str = "Basic ";
    if value.len() <= PREFIX.len() || !value[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        return None;
    }

    let decoded = BASE64.decode(value[PREFIX.len()..].trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Resolve the forward target: host, port and origin-form path
///
/// Proxy requests normally use the absolute form
/// (`GET http://host:port/path`); origin-form requests fall back to the
/// `Host` header. The port defaults to 80 when absent.
fn forward_target(head: &RequestHead) -> Option<(String, u16, String)> {
    let (host_port, path) = if let Some(rest) = head.uri.strip_prefix("http://") {
        match rest.find('/') {
            Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
            None => (rest.to_string(), "/".to_string()),
        }
    } else {
        let host = std::str::from_utf8(head.header("host")?).ok()?.trim();
        (host.to_string(), head.uri.clone())
    };

    if host_port.is_empty() {
        return None;
    }

    match net::split_host_port(&host_port) {
        Some((host, port)) => Some((host, port, path)),
        None => Some((host_port, 80, path)),
    }
}

/// Rebuild the request head for the upstream connection
///
/// The request line is rewritten to origin form and the hop-by-hop proxy
/// headers are dropped.
fn rewrite_request(head: &RequestHead, host: &str, port: u16, path: &str) -> Vec<u8> {
    let host_value = if port == 80 {
        host.to_string()
    } else {
        net::join_host_port(host, port)
    };

    let mut out = Vec::with_capacity(head.head_len);
    out.extend_from_slice(head.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(path.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    out.extend_from_slice(host_value.as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in &head.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}

fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("proxy-connection")
}

async fn send_error<S>(stream: &mut S, status: u16, message: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        status,
        status_text(status),
        message.len(),
        message
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn send_proxy_auth_required<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 407 Proxy Authentication Required\r\n\
         Proxy-Authenticate: Basic realm=\"{}\"\r\n\
         Content-Length: 0\r\n\
         \r\n",
        AUTH_REALM
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        403 => "Forbidden",
        429 => "Too Many Requests",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Error",
    }
}
