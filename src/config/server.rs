//! Listener and logging configuration types

use crate::net::NetworkFamily;
use serde::{Deserialize, Serialize};

/// Listener ports and outbound network family
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP proxy listener port
    #[serde(default)]
    pub http_port: u16,

    /// SOCKS5 proxy listener port
    #[serde(default)]
    pub socks5_port: u16,

    /// Network family used for listeners and outbound dials
    #[serde(default)]
    pub network: NetworkFamily,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_port: 0,
            socks5_port: 0,
            network: NetworkFamily::Tcp,
        }
    }
}

/// Log verbosity level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug and above
    Debug,
    /// Info and above
    #[default]
    Info,
    /// Warnings and errors only
    Warn,
    /// Errors only
    Error,
}

impl LogLevel {
    /// Convert to a tracing level filter
    pub fn to_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
        }
    }
}

/// Log output sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDriver {
    /// Write to standard output
    #[default]
    Stdout,
    /// Write to a file (see [`LogConfig::path`])
    File,
}

/// Log sink configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// Minimum level to emit
    #[serde(default)]
    pub level: LogLevel,

    /// Output driver
    #[serde(default)]
    pub driver: LogDriver,

    /// Log file path, used by the `file` driver
    #[serde(default = "default_log_path")]
    pub path: String,
}

fn default_log_path() -> String {
    "logs/dudu-proxy.log".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: LogLevel::Info,
            driver: LogDriver::Stdout,
            path: default_log_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);

        let level: Result<LogLevel, _> = serde_json::from_str("\"verbose\"");
        assert!(level.is_err());
    }

    #[test]
    fn test_log_driver_parsing() {
        let driver: LogDriver = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(driver, LogDriver::File);
    }

    #[test]
    fn test_log_level_filter_ordering() {
        assert!(LogLevel::Debug.to_filter() > LogLevel::Info.to_filter());
        assert!(LogLevel::Info.to_filter() > LogLevel::Error.to_filter());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_port, 0);
        assert_eq!(config.network, NetworkFamily::Tcp);
    }
}
