//! Authentication, banning, rate-limit and breaker configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A proxy user credential pair
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Login name
    pub username: String,
    /// Plain-text password, matched byte-for-byte
    pub password: String,
}

/// Proxy authentication settings
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Whether clients must authenticate
    #[serde(default)]
    pub enabled: bool,

    /// Accepted credentials; must be non-empty when enabled
    #[serde(default)]
    pub users: Vec<User>,
}

/// IP ban settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IpBanConfig {
    /// Whether failed authentications lead to bans
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive failures that trigger a ban
    #[serde(default)]
    pub max_failures: u32,

    /// How long a ban lasts
    #[serde(default)]
    pub ban_duration_seconds: u64,

    /// IPs exempt from failure tracking and banning
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Where ban state is persisted across restarts
    #[serde(default = "default_persist_file")]
    pub persist_file: PathBuf,
}

fn default_persist_file() -> PathBuf {
    PathBuf::from("data/ipban.json")
}

impl Default for IpBanConfig {
    fn default() -> Self {
        IpBanConfig {
            enabled: false,
            max_failures: 0,
            ban_duration_seconds: 0,
            whitelist: Vec::new(),
            persist_file: default_persist_file(),
        }
    }
}

/// Token-bucket rate limit settings
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Whether rate limiting is applied
    #[serde(default)]
    pub enabled: bool,

    /// Refill rate of the shared global bucket (burst is twice this)
    #[serde(default)]
    pub global_requests_per_second: u32,

    /// Refill rate of each per-IP bucket (burst is twice this)
    #[serde(default)]
    pub per_ip_requests_per_second: u32,
}

/// Sliding-window circuit breaker settings
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    /// Whether the breaker participates in admission
    #[serde(default)]
    pub enabled: bool,

    /// Failure percentage (1..=100) at which the circuit opens
    #[serde(default)]
    pub failure_threshold_percent: u32,

    /// Length of the rolling outcome window
    #[serde(default)]
    pub window_size_seconds: u64,

    /// Minimum outcomes in the window before the threshold applies
    #[serde(default)]
    pub min_requests: usize,

    /// How long the circuit stays open before probing
    #[serde(default)]
    pub break_duration_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_ban_config_default_path() {
        let config = IpBanConfig::default();
        assert_eq!(config.persist_file, PathBuf::from("data/ipban.json"));
        assert!(!config.enabled);
    }

    #[test]
    fn test_user_roundtrip() {
        let user: User =
            serde_json::from_str(r#"{"username": "u", "password": "p"}"#).unwrap();
        assert_eq!(user.username, "u");
        assert_eq!(user.password, "p");
    }

    #[test]
    fn test_sections_default_disabled() {
        assert!(!AuthConfig::default().enabled);
        assert!(!RateLimitConfig::default().enabled);
        assert!(!CircuitBreakerConfig::default().enabled);
    }
}
