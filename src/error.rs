//! Error types for DuDu Proxy
//!
//! This module defines the custom error types used throughout the
//! application.

use std::io;
use thiserror::Error;

/// Main error type for DuDu Proxy operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ProxyError {
    /// Create a configuration error from any displayable value
    pub fn config(msg: impl Into<String>) -> Self {
        ProxyError::Config(msg.into())
    }
}
