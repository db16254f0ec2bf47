use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which version of a symbol a read refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// The highest version that is not tombstoned.
    #[default]
    Latest,
    /// An exact version number; tombstoned versions remain readable until
    /// they are swept.
    Version(u64),
    /// The newest version created at or before the instant.
    AsOf(DateTime<Utc>),
    /// The version pinned by the named snapshot.
    Snapshot(String),
}

impl From<u64> for VersionSelector {
    fn from(version: u64) -> Self {
        VersionSelector::Version(version)
    }
}

impl From<DateTime<Utc>> for VersionSelector {
    fn from(ts: DateTime<Utc>) -> Self {
        VersionSelector::AsOf(ts)
    }
}

impl From<&str> for VersionSelector {
    fn from(snapshot: &str) -> Self {
        VersionSelector::Snapshot(snapshot.to_string())
    }
}
