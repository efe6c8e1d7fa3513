//! Configuration module for DuDu Proxy
//!
//! This module provides configuration types and parsing for the proxy
//! server. The configuration file is JSON.

mod security;
mod server;

pub use security::{
    AuthConfig, CircuitBreakerConfig, IpBanConfig, RateLimitConfig, User,
};
pub use server::{LogConfig, LogDriver, LogLevel, ServerConfig};

use crate::error::ProxyError;
use crate::net::NetworkFamily;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Listener ports and network family
    #[serde(default)]
    pub server: ServerConfig,

    /// Proxy authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// IP ban tracking
    #[serde(default)]
    pub ip_ban: IpBanConfig,

    /// Request rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Abuse circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Log sink configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Check that the configuration is internally consistent
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.server.http_port == 0 {
            return Err(ProxyError::config(format!(
                "invalid HTTP port: {}",
                self.server.http_port
            )));
        }
        if self.server.socks5_port == 0 {
            return Err(ProxyError::config(format!(
                "invalid SOCKS5 port: {}",
                self.server.socks5_port
            )));
        }

        if self.auth.enabled && self.auth.users.is_empty() {
            return Err(ProxyError::config(
                "authentication is enabled but no users are configured",
            ));
        }

        if self.ip_ban.enabled {
            if self.ip_ban.max_failures == 0 {
                return Err(ProxyError::config(
                    "max_failures must be positive when IP ban is enabled",
                ));
            }
            if self.ip_ban.ban_duration_seconds == 0 {
                return Err(ProxyError::config(
                    "ban_duration_seconds must be positive when IP ban is enabled",
                ));
            }
        }

        if self.rate_limit.enabled {
            if self.rate_limit.global_requests_per_second == 0 {
                return Err(ProxyError::config(
                    "global_requests_per_second must be positive when rate limit is enabled",
                ));
            }
            if self.rate_limit.per_ip_requests_per_second == 0 {
                return Err(ProxyError::config(
                    "per_ip_requests_per_second must be positive when rate limit is enabled",
                ));
            }
        }

        if self.circuit_breaker.enabled {
            if self.circuit_breaker.failure_threshold_percent == 0
                || self.circuit_breaker.failure_threshold_percent > 100
            {
                return Err(ProxyError::config(
                    "failure_threshold_percent must be between 1 and 100",
                ));
            }
            if self.circuit_breaker.window_size_seconds == 0 {
                return Err(ProxyError::config("window_size_seconds must be positive"));
            }
            if self.circuit_breaker.min_requests == 0 {
                return Err(ProxyError::config("min_requests must be positive"));
            }
            if self.circuit_breaker.break_duration_seconds == 0 {
                return Err(ProxyError::config(
                    "break_duration_seconds must be positive",
                ));
            }
        }

        Ok(())
    }

    /// Build the username -> password lookup table
    pub fn user_credentials(&self) -> HashMap<String, String> {
        self.auth
            .users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect()
    }

    /// The configured outbound/listener network family
    pub fn network(&self) -> NetworkFamily {
        self.server.network
    }
}

/// Load configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a JSON string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        serde_json::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}
