//! Test utilities for DuDu Proxy integration tests

use dudu_proxy::manager::{CircuitBreaker, IpBanManager};
use dudu_proxy::middleware::{
    Admission, AuthMiddleware, CircuitBreakerMiddleware, IpBanMiddleware,
    RateLimitMiddleware,
};
use dudu_proxy::net::NetworkFamily;
use dudu_proxy::proxy::{HttpProxy, Socks5Proxy};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// The shared control plane plus both frontends, wired like the server does
pub struct TestStack {
    pub http_proxy: Arc<HttpProxy>,
    pub socks5_proxy: Arc<Socks5Proxy>,
    pub ban_mgr: Arc<IpBanManager>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Build a stack with authentication for `user1:pass1`
///
/// The breaker is configured with a high floor so auth tests do not trip it.
pub async fn build_stack(
    auth_enabled: bool,
    max_failures: u32,
    ban_duration: Duration,
    persist_file: std::path::PathBuf,
) -> TestStack {
    let ban_mgr = Arc::new(
        IpBanManager::new(max_failures, ban_duration, vec![], persist_file).await,
    );
    let breaker = Arc::new(CircuitBreaker::new(
        50,
        Duration::from_secs(60),
        1000,
        Duration::from_secs(30),
    ));

    let mut creds = HashMap::new();
    creds.insert("user1".to_string(), "pass1".to_string());
    let auth = AuthMiddleware::new(auth_enabled, creds);

    let admission = Admission::new(
        CircuitBreakerMiddleware::new(true, Arc::clone(&breaker)),
        IpBanMiddleware::new(true, Arc::clone(&ban_mgr)),
        Arc::new(RateLimitMiddleware::new(false, 0, 0)),
    );

    TestStack {
        http_proxy: Arc::new(HttpProxy::new(
            NetworkFamily::Tcp,
            admission.clone(),
            auth.clone(),
        )),
        socks5_proxy: Arc::new(Socks5Proxy::new(NetworkFamily::Tcp, admission, auth)),
        ban_mgr,
        breaker,
    }
}

/// Serve the HTTP frontend on an ephemeral port
pub async fn serve_http(proxy: Arc<HttpProxy>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move {
                let _ = proxy.handle_conn(stream, &peer.ip().to_string()).await;
            });
        }
    });
    addr
}

/// Serve the SOCKS5 frontend on an ephemeral port
pub async fn serve_socks5(proxy: Arc<Socks5Proxy>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move {
                let _ = proxy.handle_conn(stream, &peer.ip().to_string()).await;
            });
        }
    });
    addr
}

/// An upstream that echoes every byte back, for tunnel tests
pub async fn echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}
