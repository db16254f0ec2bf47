//! # version-store
//!
//! Versioned symbol store for time-indexed tables: every write appends an
//! immutable version, reads can travel back by version number, timestamp or
//! named snapshot, and a small query pipeline filters, projects, resamples
//! and aggregates data on the way out.
//!
//! This crate is the supported public entry point and provides a small,
//! stable surface over `version-store-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use version_store::prelude::*;
//!
//! let store = VersionStore::local("/var/lib/prices", StoreConfig::default())?;
//! store.write("AAPL", table, None, true).await?;
//!
//! let opts = ReadOptions::new()
//!     .selector(VersionSelector::Version(0))
//!     .query(
//!         QuerySpec::new()
//!             .resample(ResampleSpec::new(TimeBucket::parse("1h")?))
//!             .aggregate("close", "px", Reducer::Last),
//!     );
//! let hourly = store.read("AAPL", &opts).await?;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Query model namespace.
pub mod query {
    pub use version_store_core::query::{
        AggregationColumn, Closed, CompareOp, DateRange, Expr, Literal, Operand,
        ParseTimeBucketError, QueryError, QuerySpec, Reducer, ResampleSpec, RowRange, TimeBucket,
    };
}

/// Storage backends namespace.
pub mod storage {
    pub use version_store_core::storage::{
        BackendError, DeadlinePolicy, DeadlineStore, LocalStore, MemoryStore, SegmentStore,
        StorageError, StorageResult,
    };
}

pub use version_store_core::config::{ConfigError, StoreConfig};
pub use version_store_core::error::{ErrorKind, StoreError, StoreResult};
pub use version_store_core::registry::{SnapshotOptions, SnapshotRecord};
pub use version_store_core::store::{
    BatchOutcome, CancelHandle, ReadOptions, SweepReport, VersionInfo, VersionStore,
    VersionedItem,
};
pub use version_store_core::table::{ColumnDescriptor, ColumnTable, ColumnType, TimestampUnit};
pub use version_store_core::version_chain::VersionSelector;
