//! Error types and SNAFU context selectors for the public store API.
//!
//! [`StoreError`] is the error every [`VersionStore`](crate::store::VersionStore)
//! operation returns. Lower layers keep their own enums ([`StorageError`],
//! [`QueryError`]) and are wrapped here; [`StoreError::kind`] flattens the
//! whole tree into a small [`ErrorKind`] taxonomy that callers can match on
//! without caring which layer failed.

use parquet::errors::ParquetError;
use snafu::{Backtrace, prelude::*};

use crate::{config::ConfigError, query::QueryError, storage::StorageError};

/// Errors from version store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The symbol has no live version.
    #[snafu(display("Symbol not found: {symbol}"))]
    SymbolNotFound {
        /// The symbol that was looked up.
        symbol: String,
    },

    /// A selector did not resolve to a version.
    #[snafu(display("Version not found for {symbol}: {detail}"))]
    VersionNotFound {
        /// The symbol that was looked up.
        symbol: String,
        /// Which selector failed and why.
        detail: String,
    },

    /// A snapshot with this name already exists; snapshots are never
    /// overwritten.
    #[snafu(display("Snapshot already exists: {name}"))]
    SnapshotAlreadyExists {
        /// The conflicting snapshot name.
        name: String,
    },

    /// No snapshot with this name exists.
    #[snafu(display("Snapshot not found: {name}"))]
    SnapshotNotFound {
        /// The snapshot name that was looked up.
        name: String,
    },

    /// Serialized user metadata exceeded the configured ceiling.
    #[snafu(display("Metadata is {size} bytes, above the limit of {limit} bytes"))]
    MetadataTooLarge {
        /// Serialized size of the rejected metadata.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The backend returned bytes that cannot be decoded or that contradict
    /// the chain structure.
    #[snafu(display("Corrupt store content at {key}: {detail}"))]
    StorageCorruption {
        /// Key of the unreadable blob.
        key: String,
        /// What was wrong with it.
        detail: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A symbol or snapshot name cannot be used as a store key.
    #[snafu(display("Invalid {kind} name {name:?}: {reason}"))]
    InvalidName {
        /// `"symbol"` or `"snapshot"`.
        kind: &'static str,
        /// The rejected name.
        name: String,
        /// What the name violated.
        reason: &'static str,
    },

    /// The table handed to a write does not satisfy the column table rules.
    #[snafu(display("Invalid table: {reason}"))]
    InvalidTable {
        /// What the table violated.
        reason: String,
    },

    /// Version allocation kept losing races against other writers.
    #[snafu(display("Could not allocate a version for {symbol} after {attempts} attempt(s)"))]
    Conflict {
        /// The contended symbol.
        symbol: String,
        /// Number of allocation attempts made.
        attempts: u32,
    },

    /// The batch was cancelled before this symbol's read started.
    #[snafu(display("Read of {symbol} was cancelled"))]
    Cancelled {
        /// The symbol whose read never ran.
        symbol: String,
    },

    /// A batch worker task failed without producing a result.
    #[snafu(display("Worker for {symbol} failed: {message}"))]
    Worker {
        /// The symbol the worker was reading.
        symbol: String,
        /// Description of the join failure.
        message: String,
    },

    /// The store configuration was rejected.
    #[snafu(display("Invalid configuration: {source}"))]
    Config {
        /// Underlying configuration error.
        source: ConfigError,
    },

    /// Any error coming from the segment store.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Any error coming from the query pipeline.
    #[snafu(display("Query error: {source}"))]
    Query {
        /// Underlying query error.
        source: QueryError,
    },

    /// Encoding a table into a Parquet segment failed.
    #[snafu(display("Failed to encode data segment: {source}"))]
    Encode {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Serializing a record to JSON failed.
    #[snafu(display("Failed to serialize {what}: {source}"))]
    Serialize {
        /// What was being serialized.
        what: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`StoreError::SymbolNotFound`].
    SymbolNotFound,
    /// See [`StoreError::VersionNotFound`].
    VersionNotFound,
    /// See [`StoreError::SnapshotAlreadyExists`].
    SnapshotAlreadyExists,
    /// See [`StoreError::SnapshotNotFound`].
    SnapshotNotFound,
    /// See [`QueryError::ColumnNotFound`].
    ColumnNotFound,
    /// See [`QueryError::InvalidQuery`].
    InvalidQuery,
    /// See [`QueryError::UnsupportedAggregation`].
    UnsupportedAggregation,
    /// See [`StoreError::MetadataTooLarge`].
    MetadataTooLarge,
    /// A backend deadline was exceeded; the operation may be retried.
    StorageTimeout,
    /// See [`StoreError::StorageCorruption`].
    StorageCorruption,
    /// A name, key or table argument was rejected.
    InvalidArgument,
    /// See [`StoreError::Conflict`].
    Conflict,
    /// See [`StoreError::Cancelled`].
    Cancelled,
    /// Any other backend failure.
    Storage,
    /// Failures that indicate a bug or an unexpected runtime condition.
    Internal,
}

impl StoreError {
    /// Flatten this error into the store's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            StoreError::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            StoreError::SnapshotAlreadyExists { .. } => ErrorKind::SnapshotAlreadyExists,
            StoreError::SnapshotNotFound { .. } => ErrorKind::SnapshotNotFound,
            StoreError::MetadataTooLarge { .. } => ErrorKind::MetadataTooLarge,
            StoreError::StorageCorruption { .. } => ErrorKind::StorageCorruption,
            StoreError::InvalidName { .. }
            | StoreError::InvalidTable { .. }
            | StoreError::Config { .. } => {
                ErrorKind::InvalidArgument
            }
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::Cancelled { .. } => ErrorKind::Cancelled,
            StoreError::Worker { .. } => ErrorKind::Internal,
            StoreError::Storage { source } => match source {
                StorageError::Timeout { .. } => ErrorKind::StorageTimeout,
                StorageError::InvalidKey { .. } => ErrorKind::InvalidArgument,
                StorageError::NotFound { .. }
                | StorageError::AlreadyExists { .. }
                | StorageError::OtherIo { .. } => ErrorKind::Storage,
            },
            StoreError::Query { source } => match source {
                QueryError::ColumnNotFound { .. } => ErrorKind::ColumnNotFound,
                QueryError::InvalidQuery { .. } => ErrorKind::InvalidQuery,
                QueryError::UnsupportedAggregation { .. } => ErrorKind::UnsupportedAggregation,
                QueryError::Arrow { .. } => ErrorKind::Internal,
            },
            StoreError::Encode { .. } | StoreError::Serialize { .. } => ErrorKind::Internal,
        }
    }

    /// True when reissuing the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::StorageTimeout | ErrorKind::Conflict)
    }
}

impl From<StorageError> for StoreError {
    fn from(source: StorageError) -> Self {
        StoreError::Storage { source }
    }
}

impl From<QueryError> for StoreError {
    fn from(source: QueryError) -> Self {
        StoreError::Query { source }
    }
}
