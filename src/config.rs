//! Process configuration
//!
//! Options arrive from an optional JSON file plus CLI flags (flags win).
//! Validation runs once at startup and refuses out-of-range values; the
//! logger and storage-provider names go through small registries so an
//! unknown logger degrades to the default instead of failing the host.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::net::wire::DEFAULT_MAX_MESSAGE_SIZE;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9910;

/// Default concurrent-connection cap.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Smallest allowed per-socket read buffer.
pub const MIN_MESSAGE_BUFFER_SIZE: usize = 256;

/// Allowed range for the memory-limit percentage.
pub const MEMORY_LIMIT_PERCENT_RANGE: (u8, u8) = (5, 90);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },
}

fn invalid(option: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        option,
        reason: reason.into(),
    }
}

/// Storage-side value transform, selected by name at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Plain,
    Gzip,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(StorageKind::Plain),
            "gzip" => Ok(StorageKind::Gzip),
            other => Err(invalid("storage_provider", format!("unknown provider {other:?}"))),
        }
    }
}

/// Log output shape, selected by name at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggerKind {
    #[default]
    Fmt,
    Json,
    Compact,
}

impl LoggerKind {
    /// Resolve a configured name, falling back to the default subscriber
    /// when the name is unknown.
    pub fn from_name(name: &str) -> Self {
        match name {
            "fmt" => LoggerKind::Fmt,
            "json" => LoggerKind::Json,
            "compact" => LoggerKind::Compact,
            other => {
                warn!("unknown logger {:?}, using default", other);
                LoggerKind::Fmt
            }
        }
    }
}

/// Everything the host reads at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Listening TCP port.
    pub port: u16,
    /// Concurrent connection cap.
    pub maximum_connections: usize,
    /// Per-socket read buffer, bytes.
    pub message_buffer_size: usize,
    /// Idle/operation timeout per connection, seconds.
    pub communication_timeout_secs: u64,
    /// Cap on a decoded frame payload, bytes.
    pub maximum_message_size: usize,
    /// Evictable-set target as a percentage of total memory.
    pub cache_memory_limit_percentage: u8,
    /// Value transform inside the store boundary.
    pub storage_provider: StorageKind,
    /// Log output shape.
    pub logger: LoggerKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            maximum_connections: DEFAULT_MAX_CONNECTIONS,
            message_buffer_size: 8192,
            communication_timeout_secs: 60,
            maximum_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            cache_memory_limit_percentage: 25,
            storage_provider: StorageKind::Plain,
            logger: LoggerKind::Fmt,
        }
    }
}

impl CacheConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("port", "must be greater than zero"));
        }
        if self.maximum_connections == 0 {
            return Err(invalid("maximum_connections", "must be greater than zero"));
        }
        if self.message_buffer_size < MIN_MESSAGE_BUFFER_SIZE {
            return Err(invalid(
                "message_buffer_size",
                format!("must be at least {}", MIN_MESSAGE_BUFFER_SIZE),
            ));
        }
        if self.communication_timeout_secs == 0 {
            return Err(invalid("communication_timeout_secs", "must be greater than zero"));
        }
        if self.maximum_message_size == 0 {
            return Err(invalid("maximum_message_size", "must be greater than zero"));
        }
        let (lo, hi) = MEMORY_LIMIT_PERCENT_RANGE;
        if self.cache_memory_limit_percentage < lo || self.cache_memory_limit_percentage > hi {
            return Err(invalid(
                "cache_memory_limit_percentage",
                format!("must be within [{}, {}]", lo, hi),
            ));
        }
        Ok(())
    }
}

/// Install the configured tracing subscriber. Call once, before anything
/// logs; the env filter still has the last word.
pub fn init_logging(kind: LoggerKind) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("tagcache=info".parse().expect("static directive"));

    match kind {
        LoggerKind::Fmt => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LoggerKind::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LoggerKind::Compact => tracing_subscriber::fmt().compact().with_env_filter(filter).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.port = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CacheConfig::default();
        cfg.message_buffer_size = 64;
        assert!(cfg.validate().is_err());

        let mut cfg = CacheConfig::default();
        cfg.cache_memory_limit_percentage = 4;
        assert!(cfg.validate().is_err());
        cfg.cache_memory_limit_percentage = 91;
        assert!(cfg.validate().is_err());
        cfg.cache_memory_limit_percentage = 90;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_storage_kind_names() {
        assert_eq!("plain".parse::<StorageKind>().unwrap(), StorageKind::Plain);
        assert_eq!("gzip".parse::<StorageKind>().unwrap(), StorageKind::Gzip);
        assert!("lzma".parse::<StorageKind>().is_err());
    }

    #[test]
    fn test_unknown_logger_falls_back() {
        assert_eq!(LoggerKind::from_name("json"), LoggerKind::Json);
        assert_eq!(LoggerKind::from_name("syslog4j"), LoggerKind::Fmt);
    }

    #[test]
    fn test_config_file_round_trip() {
        let cfg = CacheConfig {
            port: 4242,
            storage_provider: StorageKind::Gzip,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, 4242);
        assert_eq!(parsed.storage_provider, StorageKind::Gzip);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: CacheConfig = serde_json::from_str(r#"{"port": 7000}"#).unwrap();
        assert_eq!(parsed.port, 7000);
        assert_eq!(parsed.maximum_connections, DEFAULT_MAX_CONNECTIONS);
    }
}
