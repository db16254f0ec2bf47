//! Named snapshots and the version retention they imply.

pub mod retention;
pub mod snapshot;

pub use retention::RetentionCounts;
pub use snapshot::{SnapshotOptions, SnapshotRecord};
