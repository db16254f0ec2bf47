//! Core engine for a versioned, time-travelling symbol store.
//!
//! Each symbol (a named table) owns an append-only chain of immutable
//! versions. A version can be read back by number, by timestamp ("as of") or
//! through a named snapshot, and every read can prune, filter, project,
//! resample and aggregate the stored columns before they are returned.
//!
//! The crate is organised leaf-first:
//!
//! - [`storage`]: the narrow keyed-blob interface ([`storage::SegmentStore`])
//!   with local-directory and in-memory backends and a deadline/retry wrapper.
//! - [`version_chain`]: version records, selectors and the per-symbol commit
//!   protocol.
//! - [`registry`]: named snapshots and the retention they imply.
//! - [`query`]: the serializable query model and its Arrow-based pipeline.
//! - [`store`]: [`store::VersionStore`], the handle applications use.
//!
//! Column data is carried as Arrow record batches ([`table::ColumnTable`])
//! and persisted as Parquet segments.
#![deny(missing_docs)]
pub mod config;
pub mod error;
pub mod layout;
pub mod query;
pub mod registry;
pub mod segments;
pub mod storage;
pub mod store;
pub mod table;
pub mod version_chain;

pub use config::StoreConfig;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use store::VersionStore;
