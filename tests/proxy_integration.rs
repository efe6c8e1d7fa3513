//! End-to-end tests over real TCP sockets
//!
//! Each test wires the control plane and a frontend the same way the server
//! orchestrator does, then drives it with a raw TCP client.

mod common;

use common::{build_stack, echo_upstream, serve_http, serve_socks5};
use dudu_proxy::manager::{BanRecord, BreakerState, CircuitBreaker, HALF_OPEN_MAX_REQUESTS};
use dudu_proxy::middleware::RateLimitMiddleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_http_connect_tunnel_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let stack = build_stack(
        true,
        100,
        Duration::from_secs(300),
        dir.path().join("ipban.json"),
    )
    .await;

    let proxy_addr = serve_http(Arc::clone(&stack.http_proxy)).await;
    let upstream = echo_upstream().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "CONNECT 127.0.0.1:{port} HTTP/1.1\r\n\
         Host: 127.0.0.1:{port}\r\n\
         Proxy-Authorization: Basic dXNlcjE6cGFzczE=\r\n\
         \r\n",
        port = upstream.port()
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let expected = b"HTTP/1.1 200 Connection Established\r\n\r\n";
    let mut buf = vec![0u8; expected.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, expected);

    client.write_all(b"through the tunnel").await.unwrap();
    let mut echoed = [0u8; 18];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"through the tunnel");
}

#[tokio::test]
async fn test_http_auth_failures_escalate_to_ban() {
    let dir = tempfile::tempdir().unwrap();
    let persist_file = dir.path().join("ipban.json");
    let stack = build_stack(true, 3, Duration::from_secs(300), persist_file.clone()).await;
    let proxy_addr = serve_http(Arc::clone(&stack.http_proxy)).await;

    // Three failed attempts, each on a fresh connection
    for attempt in 1..=3 {
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client
            .write_all(
                b"CONNECT example.com:443 HTTP/1.1\r\n\
                  Host: example.com:443\r\n\
                  Proxy-Authorization: Basic d3Jvbmc6d3Jvbmc=\r\n\
                  \r\n",
            )
            .await
            .unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(
            response.starts_with("HTTP/1.1 407 "),
            "attempt {}: {}",
            attempt,
            response
        );
        assert!(response.contains("Proxy-Authenticate: Basic realm=\"DuDu Proxy\"\r\n"));
    }

    assert!(stack.ban_mgr.is_banned("127.0.0.1"));

    // Even valid credentials are rejected while the ban holds
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(
            b"CONNECT example.com:443 HTTP/1.1\r\n\
              Host: example.com:443\r\n\
              Proxy-Authorization: Basic dXNlcjE6cGFzczE=\r\n\
              \r\n",
        )
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    // The ban is on disk with the triggering failure count
    stack.ban_mgr.stop().await;
    let data = std::fs::read(&persist_file).unwrap();
    let records: Vec<BanRecord> = serde_json::from_slice(&data).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ip, "127.0.0.1");
    assert_eq!(records[0].fail_count, 3);
    assert!(records[0].expires_at.is_some());
}

#[tokio::test]
async fn test_ban_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let persist_file = dir.path().join("ipban.json");

    let stack = build_stack(true, 2, Duration::from_secs(300), persist_file.clone()).await;
    stack.ban_mgr.record_failure("10.9.8.7");
    stack.ban_mgr.record_failure("10.9.8.7");
    assert!(stack.ban_mgr.is_banned("10.9.8.7"));
    stack.ban_mgr.stop().await;

    let restarted = build_stack(true, 2, Duration::from_secs(300), persist_file).await;
    assert!(restarted.ban_mgr.is_banned("10.9.8.7"));
    assert_eq!(restarted.ban_mgr.list_banned(), vec!["10.9.8.7".to_string()]);
}

#[tokio::test]
async fn test_socks5_connect_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let stack = build_stack(
        false,
        100,
        Duration::from_secs(300),
        dir.path().join("ipban.json"),
    )
    .await;

    let proxy_addr = serve_socks5(Arc::clone(&stack.socks5_proxy)).await;
    let upstream = echo_upstream().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    // Greeting
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    // CONNECT 127.0.0.1:<port>
    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&upstream.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    client.write_all(b"socks bytes").await.unwrap();
    let mut echoed = [0u8; 11];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"socks bytes");
}

#[tokio::test]
async fn test_socks5_auth_and_http_share_ban_state() {
    let dir = tempfile::tempdir().unwrap();
    let stack = build_stack(
        true,
        2,
        Duration::from_secs(300),
        dir.path().join("ipban.json"),
    )
    .await;

    let socks_addr = serve_socks5(Arc::clone(&stack.socks5_proxy)).await;
    let http_addr = serve_http(Arc::clone(&stack.http_proxy)).await;

    // Two SOCKS5 auth failures ban the client IP
    for _ in 0..2 {
        let mut client = TcpStream::connect(socks_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [0x05, 0x02]);

        let mut auth = vec![0x01, 5];
        auth.extend_from_slice(b"user1");
        auth.push(5);
        auth.extend_from_slice(b"wrong");
        client.write_all(&auth).await.unwrap();

        let mut status = [0u8; 2];
        client.read_exact(&mut status).await.unwrap();
        assert_eq!(status, [0x01, 0x01]);
    }

    // Both failures also landed in the shared breaker window
    let (total, failures, _) = stack.breaker.stats();
    assert_eq!((total, failures), (2, 2));

    // The HTTP frontend sees the same ban
    let mut client = TcpStream::connect(http_addr).await.unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    // And new SOCKS5 connections are closed silently
    let mut client = TcpStream::connect(socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_breaker_opens_and_recovers() {
    let breaker = CircuitBreaker::new(
        50,
        Duration::from_secs(60),
        20,
        Duration::from_millis(300),
    );

    for _ in 0..10 {
        breaker.record_success();
    }
    for _ in 0..11 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(breaker.is_open());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    assert!(!breaker.is_open());

    for _ in 0..HALF_OPEN_MAX_REQUESTS {
        breaker.record_success();
    }
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_breaker_probe_failure_reopens() {
    let breaker = CircuitBreaker::new(
        50,
        Duration::from_secs(60),
        20,
        Duration::from_millis(300),
    );

    for _ in 0..10 {
        breaker.record_success();
    }
    for _ in 0..11 {
        breaker.record_failure();
    }
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    // One failing probe reopens the circuit with a fresh stamp
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(breaker.is_open());
}

#[tokio::test]
async fn test_rate_limiter_burst_and_isolation() {
    let limiter = RateLimitMiddleware::new(true, 1000, 5);

    let allowed = (0..15).filter(|_| limiter.allow("10.0.0.1")).count();
    assert_eq!(allowed, 10);

    // A different IP is unaffected at the same instant
    assert!(limiter.allow("10.0.0.2"));
}
