//! DuDu Proxy - dual-protocol forwarding proxy
//!
//! This is the main entry point for the proxy server binary.

use anyhow::Result;
use clap::Parser;
use dudu_proxy::config::{load_config, Config};
use dudu_proxy::server::Server;
use dudu_proxy::{logging, VERSION};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::info;

/// DuDu Proxy - HTTP/1.1 + SOCKS5 forwarding proxy server
#[derive(Parser, Debug)]
#[command(name = "dudu-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "configs/config.example.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logger; the guard must live until exit
    let _log_guard = logging::init(&config.log)?;

    info!("Starting DuDu Proxy v{}", VERSION);
    info!("Configuration loaded from: {:?}", args.config);
    log_config_summary(&config);

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received signal: SIGINT");
                }
                _ = sigterm.recv() => {
                    info!("Received signal: SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }

        let _ = shutdown_tx.send(());
    });

    // Create and run the server
    let server = Server::new(config).await?;
    server.run(shutdown_rx).await
}

fn log_config_summary(config: &Config) {
    info!(
        "Listeners: http_port={} socks5_port={} network={}",
        config.server.http_port,
        config.server.socks5_port,
        config.network()
    );
    info!(
        "Authentication: enabled={} users={}",
        config.auth.enabled,
        config.auth.users.len()
    );
    info!(
        "IP ban: enabled={} max_failures={} ban_duration={}s",
        config.ip_ban.enabled, config.ip_ban.max_failures, config.ip_ban.ban_duration_seconds
    );
    info!(
        "Rate limit: enabled={} global_rps={} per_ip_rps={}",
        config.rate_limit.enabled,
        config.rate_limit.global_requests_per_second,
        config.rate_limit.per_ip_requests_per_second
    );
    info!(
        "Circuit breaker: enabled={} threshold={}% window={}s min_requests={} break={}s",
        config.circuit_breaker.enabled,
        config.circuit_breaker.failure_threshold_percent,
        config.circuit_breaker.window_size_seconds,
        config.circuit_breaker.min_requests,
        config.circuit_breaker.break_duration_seconds
    );
}
