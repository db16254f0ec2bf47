//! Store configuration.
//!
//! [`StoreConfig`] is a plain serde struct: every field has a default, so a
//! configuration document only needs to name the settings it overrides.
//!
//! ```
//! use version_store_core::config::StoreConfig;
//!
//! let config = StoreConfig::from_json_str(r#"{ "rows_per_segment": 5000 }"#).unwrap();
//! assert_eq!(config.rows_per_segment, 5000);
//! assert_eq!(config.batch_concurrency, StoreConfig::default().batch_concurrency);
//! ```

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Errors produced while loading a [`StoreConfig`].
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The document was not valid JSON or contained unknown keys.
    #[snafu(display("Invalid store configuration: {source}"))]
    Parse {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A setting had a value outside its allowed range.
    #[snafu(display("Invalid value for {field}: {reason}"))]
    OutOfRange {
        /// Name of the offending setting.
        field: &'static str,
        /// What the setting requires.
        reason: &'static str,
    },
}

/// Tunables for a [`VersionStore`](crate::store::VersionStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Maximum number of rows in one persisted data segment.
    pub rows_per_segment: usize,
    /// Ceiling on the serialized size of user metadata, in bytes.
    pub max_metadata_bytes: usize,
    /// Deadline for a single backend call, in milliseconds.
    pub io_timeout_ms: u64,
    /// Retries of an idempotent backend call after a timeout.
    pub io_max_retries: u32,
    /// Initial retry backoff in milliseconds; doubled per retry.
    pub io_retry_backoff_ms: u64,
    /// Attempts at allocating a version number before giving up with a
    /// conflict.
    pub max_commit_attempts: u32,
    /// Maximum number of per-symbol pipelines in flight in a batch read.
    pub batch_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rows_per_segment: 100_000,
            max_metadata_bytes: 4 * 1024 * 1024,
            io_timeout_ms: 30_000,
            io_max_retries: 3,
            io_retry_backoff_ms: 50,
            max_commit_attempts: 16,
            batch_concurrency: 8,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON configuration document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_json::from_str(json).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the store unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.rows_per_segment > 0,
            OutOfRangeSnafu {
                field: "rows_per_segment",
                reason: "must be at least 1",
            }
        );
        ensure!(
            self.io_timeout_ms > 0,
            OutOfRangeSnafu {
                field: "io_timeout_ms",
                reason: "must be at least 1",
            }
        );
        ensure!(
            self.max_commit_attempts > 0,
            OutOfRangeSnafu {
                field: "max_commit_attempts",
                reason: "must be at least 1",
            }
        );
        ensure!(
            self.batch_concurrency > 0,
            OutOfRangeSnafu {
                field: "batch_concurrency",
                reason: "must be at least 1",
            }
        );
        Ok(())
    }
}
