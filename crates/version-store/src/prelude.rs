//! Wrapper prelude.
//!
//! The `version-store` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::query::{
    Closed, DateRange, Expr, Literal, QuerySpec, Reducer, ResampleSpec, RowRange, TimeBucket,
};
pub use crate::{
    BatchOutcome, CancelHandle, ColumnTable, ErrorKind, ReadOptions, SnapshotOptions,
    StoreConfig, StoreError, StoreResult, VersionSelector, VersionStore, VersionedItem,
};
