//! Snapshot reference counts per version.
//!
//! Counts are rebuilt from the persisted snapshot records whenever they are
//! needed, so they survive restarts and reflect snapshots taken by other
//! processes sharing the store.

use std::collections::HashMap;

use super::snapshot::SnapshotRecord;

/// Which snapshots pin which `(symbol, version)` pairs.
#[derive(Debug, Clone, Default)]
pub struct RetentionCounts {
    pins: HashMap<(String, u64), Vec<String>>,
}

impl RetentionCounts {
    /// Tally the pins of `records`.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SnapshotRecord>) -> Self {
        let mut pins: HashMap<(String, u64), Vec<String>> = HashMap::new();
        for record in records {
            for (symbol, version) in &record.versions {
                pins.entry((symbol.clone(), *version))
                    .or_default()
                    .push(record.name.clone());
            }
        }
        for names in pins.values_mut() {
            names.sort();
        }
        Self { pins }
    }

    /// Number of snapshots pinning `symbol@version`.
    pub fn count(&self, symbol: &str, version: u64) -> usize {
        self.snapshots(symbol, version).len()
    }

    /// True when at least one snapshot pins `symbol@version`.
    pub fn is_pinned(&self, symbol: &str, version: u64) -> bool {
        self.count(symbol, version) > 0
    }

    /// Names of the snapshots pinning `symbol@version`, sorted.
    pub fn snapshots(&self, symbol: &str, version: u64) -> &[String] {
        self.pins
            .get(&(symbol.to_string(), version))
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snap(name: &str, pins: &[(&str, u64)]) -> SnapshotRecord {
        SnapshotRecord {
            name: name.to_string(),
            created_at: Utc::now(),
            metadata: None,
            versions: pins
                .iter()
                .map(|(s, v)| ((*s).to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn counts_every_snapshot_pinning_a_version() {
        let records = [
            snap("weekly", &[("a", 1), ("b", 4)]),
            snap("daily", &[("a", 1)]),
            snap("old", &[("a", 0)]),
        ];
        let counts = RetentionCounts::from_records(&records);

        assert_eq!(counts.count("a", 1), 2);
        assert_eq!(counts.snapshots("a", 1), ["daily", "weekly"]);
        assert!(counts.is_pinned("b", 4));
        assert!(!counts.is_pinned("b", 3));
        assert!(counts.snapshots("c", 0).is_empty());
    }
}
