//! Session configuration and smoke-binary CLI arguments
//!
//! Sessions are configured from TOML:
//!
//! ```toml
//! receipt_timeout_ms = 5000
//! transaction_prefix = "orders"
//!
//! [default_headers]
//! persistent = "true"
//!
//! [subscribe_headers]
//! ack = "client"
//! ```

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StompError};
use crate::headers::{Headers, RECEIPT, TRANSACTION};

/// Per-session settings, fixed once the session is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Merged into every non-subscribe command
    pub default_headers: Headers,

    /// Merged into subscribe commands only
    pub subscribe_headers: Headers,

    /// Bound on each receipt wait; absent means wait forever
    pub receipt_timeout_ms: Option<u64>,

    /// Leading component of generated transaction ids
    pub transaction_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_headers: Headers::new(),
            subscribe_headers: Headers::new(),
            receipt_timeout_ms: None,
            transaction_prefix: default_transaction_prefix(),
        }
    }
}

fn default_transaction_prefix() -> String {
    "transaction".to_string()
}

impl SessionConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_prefix.trim().is_empty() {
            return Err(StompError::Config(
                "transaction_prefix must not be empty".into(),
            ));
        }

        if self.receipt_timeout_ms == Some(0) {
            return Err(StompError::Config(
                "receipt_timeout_ms must be greater than zero".into(),
            ));
        }

        // Both keys are owned by the session and would be overwritten anyway.
        for (section, headers) in [
            ("default_headers", &self.default_headers),
            ("subscribe_headers", &self.subscribe_headers),
        ] {
            for reserved in [RECEIPT, TRANSACTION] {
                if headers.contains_key(reserved) {
                    return Err(StompError::Config(format!(
                        "{} may not set the reserved '{}' header",
                        section, reserved
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn receipt_timeout(&self) -> Option<Duration> {
        self.receipt_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_subscribe_header(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.subscribe_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_transaction_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.transaction_prefix = prefix.into();
        self
    }
}

/// stomp-sync - receipt-confirmed sends over an in-process loopback broker
#[derive(Parser, Debug, Clone)]
#[command(name = "stomp-sync")]
#[command(about = "Exercise blocking STOMP sessions against the loopback broker")]
pub struct Args {
    /// Session configuration file (TOML)
    #[arg(long, env = "STOMP_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Destination to send to
    #[arg(long, env = "DESTINATION", default_value = "/queue/stomp-sync")]
    pub destination: String,

    /// Number of messages to send
    #[arg(long, env = "MESSAGES", default_value = "3")]
    pub messages: usize,

    /// Send all messages inside one transaction
    #[arg(long, env = "TRANSACTIONAL", default_value = "false")]
    pub transactional: bool,

    /// Receipt timeout in milliseconds (overrides the config file)
    #[arg(long, env = "RECEIPT_TIMEOUT_MS")]
    pub receipt_timeout_ms: Option<u64>,

    /// Artificial delay before the loopback broker answers, in milliseconds
    #[arg(long, env = "RECEIPT_DELAY_MS", default_value = "0")]
    pub receipt_delay_ms: u64,
}

impl Args {
    /// Resolve the session configuration from the file and CLI overrides.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)?,
            None => SessionConfig::default(),
        };

        if let Some(timeout_ms) = self.receipt_timeout_ms {
            config.receipt_timeout_ms = Some(timeout_ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn receipt_delay(&self) -> Duration {
        Duration::from_millis(self.receipt_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert!(config.default_headers.is_empty());
        assert!(config.subscribe_headers.is_empty());
        assert_eq!(config.receipt_timeout(), None);
        assert_eq!(config.transaction_prefix, "transaction");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = SessionConfig::from_toml_str(
            r#"
receipt_timeout_ms = 1500
transaction_prefix = "orders"

[default_headers]
persistent = "true"

[subscribe_headers]
ack = "client"
"#,
        )
        .unwrap();

        assert_eq!(config.receipt_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.transaction_prefix, "orders");
        assert_eq!(config.default_headers["persistent"], "true");
        assert_eq!(config.subscribe_headers["ack"], "client");
    }

    #[test]
    fn test_reserved_header_rejected() {
        let err = SessionConfig::default()
            .with_default_header("receipt", "mine")
            .validate()
            .unwrap_err();
        assert!(matches!(err, StompError::Config(_)));

        let err = SessionConfig::from_toml_str("[subscribe_headers]\ntransaction = \"t\"\n")
            .unwrap_err();
        assert!(matches!(err, StompError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_and_empty_prefix_rejected() {
        assert!(SessionConfig::from_toml_str("receipt_timeout_ms = 0").is_err());
        assert!(SessionConfig::default()
            .with_transaction_prefix("  ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_args_override_timeout() {
        let args = Args::parse_from([
            "stomp-sync",
            "--receipt-timeout-ms",
            "250",
            "--transactional",
        ]);
        let config = args.session_config().unwrap();
        assert_eq!(config.receipt_timeout(), Some(Duration::from_millis(250)));
        assert!(args.transactional);
        assert_eq!(args.messages, 3);
    }
}
