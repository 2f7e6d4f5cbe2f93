//! Error types for stomp-sync

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StompError {
    /// The broker rejected or could not process a command.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No receipt for {command} after {after:?}")]
    Timeout { command: String, after: Duration },

    /// The client dropped a receipt listener without ever firing it.
    #[error("Receipt listener abandoned: {0}")]
    ReceiptAbandoned(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Raised by the connection layer; passed through untouched.
    #[error("Maximum connection attempts reached ({0})")]
    MaxConnectionAttemptsReached(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl StompError {
    /// True for failures that leave the connection itself unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            StompError::NotConnected(_) | StompError::MaxConnectionAttemptsReached(_)
        )
    }
}

/// Result type for stomp-sync operations
pub type Result<T> = std::result::Result<T, StompError>;
