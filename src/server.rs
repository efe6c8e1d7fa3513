//! Server orchestrator
//!
//! Builds the managers and frontends from configuration, runs one accept
//! loop per protocol and coordinates graceful shutdown: stop accepting,
//! flush ban state, then give in-flight connections a short drain window.

use crate::config::Config;
use crate::manager::{CircuitBreaker, IpBanManager};
use crate::middleware::{
    Admission, AuthMiddleware, CircuitBreakerMiddleware, IpBanMiddleware,
    RateLimitMiddleware,
};
use crate::net::client_ip;
use crate::proxy::{HttpProxy, ProxyService, Socks5Proxy};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// How long shutdown waits for in-flight connections to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The proxy server: both frontends plus the shared control plane
pub struct Server {
    config: Config,
    http_proxy: Arc<HttpProxy>,
    socks5_proxy: Arc<Socks5Proxy>,
    ip_ban: Arc<IpBanManager>,
}

impl Server {
    /// Construct managers, middleware and frontends from configuration
    pub async fn new(config: Config) -> Result<Self> {
        let ip_ban = Arc::new(
            IpBanManager::new(
                config.ip_ban.max_failures,
                Duration::from_secs(config.ip_ban.ban_duration_seconds),
                config.ip_ban.whitelist.clone(),
                config.ip_ban.persist_file.clone(),
            )
            .await,
        );

        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker.failure_threshold_percent,
            Duration::from_secs(config.circuit_breaker.window_size_seconds),
            config.circuit_breaker.min_requests,
            Duration::from_secs(config.circuit_breaker.break_duration_seconds),
        ));

        let auth = AuthMiddleware::new(config.auth.enabled, config.user_credentials());

        let rate_limit = Arc::new(RateLimitMiddleware::new(
            config.rate_limit.enabled,
            config.rate_limit.global_requests_per_second,
            config.rate_limit.per_ip_requests_per_second,
        ));

        let admission = Admission::new(
            CircuitBreakerMiddleware::new(config.circuit_breaker.enabled, breaker),
            IpBanMiddleware::new(config.ip_ban.enabled, Arc::clone(&ip_ban)),
            rate_limit,
        );

        let family = config.network();
        let http_proxy = Arc::new(HttpProxy::new(family, admission.clone(), auth.clone()));
        let socks5_proxy = Arc::new(Socks5Proxy::new(family, admission, auth));

        Ok(Server {
            config,
            http_proxy,
            socks5_proxy,
            ip_ban,
        })
    }

    /// Run both listeners until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let family = self.config.network();

        let http_listener = TcpListener::bind(
            family.listen_addr(self.config.server.http_port),
        )
        .await
        .with_context(|| {
            format!(
                "failed to start HTTP proxy on port {}",
                self.config.server.http_port
            )
        })?;

        let socks5_listener = TcpListener::bind(
            family.listen_addr(self.config.server.socks5_port),
        )
        .await
        .with_context(|| {
            format!(
                "failed to start SOCKS5 proxy on port {}",
                self.config.server.socks5_port
            )
        })?;

        info!(
            "HTTP proxy server started: port={} network={}",
            self.config.server.http_port, family
        );
        info!(
            "SOCKS5 proxy server started: port={} network={}",
            self.config.server.socks5_port, family
        );

        let active = Arc::new(AtomicUsize::new(0));
        let (stop_tx, _) = broadcast::channel(1);

        let http_loop = tokio::spawn(accept_loop(
            http_listener,
            Arc::clone(&self.http_proxy) as Arc<dyn ProxyService>,
            stop_tx.subscribe(),
            Arc::clone(&active),
        ));
        let socks5_loop = tokio::spawn(accept_loop(
            socks5_listener,
            Arc::clone(&self.socks5_proxy) as Arc<dyn ProxyService>,
            stop_tx.subscribe(),
            Arc::clone(&active),
        ));

        let _ = shutdown_rx.recv().await;
        info!("Shutting down gracefully...");

        // Stop accepting new connections
        let _ = stop_tx.send(());
        let _ = http_loop.await;
        let _ = socks5_loop.await;

        // Stop the sweeper and flush ban state
        self.ip_ban.stop().await;

        // In-flight connections are not terminated; wait a bounded moment
        // for them to drain on their own
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while active.load(Ordering::Relaxed) > 0 && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = active.load(Ordering::Relaxed);
        if remaining > 0 {
            info!("Exiting with {} connection(s) still active", remaining);
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Decrements the active-connection counter when a handler finishes
struct ConnGuard(Arc<AtomicUsize>);

impl ConnGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        ConnGuard(counter)
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Accept connections and hand each to the frontend on its own task
async fn accept_loop(
    listener: TcpListener,
    service: Arc<dyn ProxyService>,
    mut stop_rx: broadcast::Receiver<()>,
    active: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ip = client_ip(peer);
                    let service = Arc::clone(&service);
                    let guard = ConnGuard::new(Arc::clone(&active));
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(e) = service.handle(stream, ip).await {
                            debug!("{} connection ended with error: {:#}", service.name(), e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = stop_rx.recv() => {
                info!("{} listener stopped", service.name());
                break;
            }
        }
    }
}
