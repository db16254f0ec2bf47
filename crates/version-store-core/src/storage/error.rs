use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

/// Errors produced by a concrete storage backend implementation.
///
/// Backend-specific failures are wrapped in this enum so the storage layer can
/// map them into [`StorageError`] variants with key context attached.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur during segment store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// No blob is stored under the key.
    #[snafu(display("Key not found: {key}"))]
    NotFound {
        /// The key that was not found.
        key: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A blob already exists under the key and create-only semantics were
    /// requested.
    #[snafu(display("Key already exists: {key}"))]
    AlreadyExists {
        /// The key that was found to already exist.
        key: String,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// The backend failed while serving the request.
    #[snafu(display("Backend I/O error at {key}: {source}"))]
    OtherIo {
        /// The key (or backend path) where the error occurred.
        key: String,
        /// Underlying backend error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The backend did not answer within the configured deadline.
    ///
    /// This error is retryable: the operation may be reissued by the caller.
    #[snafu(display("Storage deadline exceeded for {op} on {key} after {attempts} attempt(s)"))]
    Timeout {
        /// Name of the backend operation that timed out.
        op: &'static str,
        /// The key the operation targeted.
        key: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The key is not valid for the backend (empty, absolute, or escaping
    /// the store root).
    #[snafu(display("Invalid storage key {key:?}: {reason}"))]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why the key was rejected.
        reason: String,
    },
}

impl StorageError {
    /// True when retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout { .. })
    }

    /// True for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// True for the `AlreadyExists` variant.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }
}
