//! Pipeline configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a partial JSON
//! document only overrides the fields it names.

use std::collections::BTreeMap;

use logflow_core::Level;
use serde::{Deserialize, Serialize};

/// Configuration failures. Shared with the engine's config loader.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Similarity throttling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Rolling window per signature. Default: 5s.
    pub window_ms: u64,
    /// Identical-signature messages let through per window. Default: 5.
    pub max_similar: u32,
    /// Per-component overrides of `max_similar`.
    pub component_caps: BTreeMap<String, u32>,
    /// Messages matching any of these regexes are never suppressed.
    pub always_surface: Vec<String>,
    /// Memoized signatures. Default: 512.
    pub signature_cache: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            max_similar: 5,
            component_caps: BTreeMap::new(),
            always_surface: vec![
                r"(?i)\bpanic".to_string(),
                r"(?i)out of memory".to_string(),
            ],
            signature_cache: 512,
        }
    }
}

/// Outbound batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Records per batch before an immediate flush. Default: 50.
    pub max_batch_size: usize,
    /// Longest a record may wait in the buffer. Default: 2s.
    pub max_wait_ms: u64,
    /// Upper bound of one `send_batch` payload. Default: 1 MiB.
    pub max_payload_bytes: usize,
    /// Records encoding larger than this are truncated. Default: 100 KiB.
    pub max_record_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_wait_ms: 2_000,
            max_payload_bytes: 1024 * 1024,
            max_record_bytes: 100 * 1024,
        }
    }
}

/// Redelivery of failed critical payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after the first failure before falling back. Default: 3.
    pub max_retries: u32,
    /// Fixed delay between attempts. Default: 5s.
    pub retry_delay_ms: u64,
    /// Pending deliveries kept at most. Default: 1000.
    pub max_queued: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
            max_queued: 1_000,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub throttle: ThrottleConfig,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
    /// Entries below this level are kept local.
    pub min_outbound_level: Level,
    /// Forward TRACE entries regardless of `min_outbound_level`.
    pub trace_forwarding: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            dispatcher: DispatcherConfig::default(),
            retry: RetryConfig::default(),
            min_outbound_level: Level::Debug,
            trace_forwarding: false,
        }
    }
}

impl TelemetryConfig {
    /// Short windows and small batches.
    pub fn for_testing() -> Self {
        Self {
            throttle: ThrottleConfig {
                window_ms: 1_000,
                signature_cache: 32,
                ..ThrottleConfig::default()
            },
            dispatcher: DispatcherConfig {
                max_batch_size: 4,
                max_wait_ms: 100,
                ..DispatcherConfig::default()
            },
            retry: RetryConfig {
                max_retries: 2,
                retry_delay_ms: 50,
                max_queued: 16,
            },
            min_outbound_level: Level::Debug,
            trace_forwarding: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle.window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "throttle.window_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.dispatcher.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.max_batch_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.dispatcher.max_record_bytes > self.dispatcher.max_payload_bytes {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.max_record_bytes",
                reason: "cannot exceed max_payload_bytes".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{"throttle": {"max_similar": 2}, "trace_forwarding": true}"#)
                .unwrap();
        assert_eq!(config.throttle.max_similar, 2);
        assert_eq!(config.throttle.window_ms, 5_000);
        assert_eq!(config.dispatcher.max_batch_size, 50);
        assert!(config.trace_forwarding);
    }

    #[test]
    fn test_validate() {
        assert!(TelemetryConfig::default().validate().is_ok());
        assert!(TelemetryConfig::for_testing().validate().is_ok());

        let mut bad = TelemetryConfig::default();
        bad.dispatcher.max_record_bytes = bad.dispatcher.max_payload_bytes + 1;
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("max_record_bytes"));
    }
}
