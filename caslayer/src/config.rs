//! File-based configuration for the demo runner.
//!
//! The configuration is a single JSON document. Every field is optional and falls back to
//! its default:
//!
//! ```json
//! {
//!     "store": { "latency_ms": 1 },
//!     "unique_key": true,
//!     "harness": {
//!         "worker_count": 10,
//!         "increments_per_worker": 100,
//!         "key": "ctr",
//!         "initial_value": 0,
//!         "retry": { "max_attempts": 100, "backoff": { "base_delay_ms": 1, "max_delay_ms": 50 } }
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::{io, path::Path, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use caslayer_core::error::KvStoreError;

use crate::harness::HarnessConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] KvStoreError),
}

/// Settings of the in-memory store used by the demo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Simulated round-trip time of every store operation, in milliseconds.
    pub latency_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { latency_ms: 1 }
    }
}

impl StoreConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub store: StoreConfig,
    pub harness: HarnessConfig,
    /// Append a random suffix to the counter key so that runs never share a document.
    pub unique_key: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            harness: HarnessConfig::default(),
            unique_key: true,
        }
    }
}

impl DemoConfig {
    /// Loads and validates a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&raw)
    }

    /// Parses and validates a configuration document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.harness.validate()?;

        Ok(config)
    }

    /// The harness configuration to run, with the key made unique if requested.
    pub fn harness_config(&self) -> HarnessConfig {
        let mut harness = self.harness.clone();
        if self.unique_key {
            harness.key = format!("{}-{}", harness.key, Uuid::new_v4());
        }

        harness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DemoConfig::from_json("{}").unwrap();

        assert_eq!(config, DemoConfig::default());
        assert_eq!(config.store.latency(), Duration::from_millis(1));
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let config = DemoConfig::from_json(
            r#"{ "store": { "latency_ms": 0 }, "unique_key": false, "harness": { "worker_count": 2 } }"#,
        )
        .unwrap();

        assert_eq!(config.store.latency(), Duration::ZERO);
        assert_eq!(config.harness.worker_count, 2);
        assert_eq!(config.harness.increments_per_worker, 100);
        assert_eq!(config.harness_config().key, "ctr");
    }

    #[test]
    fn unique_key_gets_a_suffix() {
        let config = DemoConfig::default();

        let first = config.harness_config().key;
        let second = config.harness_config().key;

        assert!(first.starts_with("ctr-"));
        assert_ne!(first, second);
    }

    #[test]
    fn invalid_harness_is_rejected() {
        let err = DemoConfig::from_json(r#"{ "harness": { "worker_count": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(KvStoreError::InvalidConfig(_))));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(DemoConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = DemoConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
