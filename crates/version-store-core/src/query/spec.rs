//! Serializable query specifications.
//!
//! A [`QuerySpec`] bundles the optional filter, resample and aggregation
//! stages. It is plain data: it can be built once, serialized, and shared
//! across every symbol of a batch read.

use std::{collections::HashSet, ops::Range};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    error::{QueryResult, invalid},
    expr::Expr,
    time_bucket::TimeBucket,
};

/// Aggregation function applied to a column within each bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Number of non-null values.
    Count,
    /// Sum of non-null values.
    Sum,
    /// Smallest non-null value.
    Min,
    /// Largest non-null value.
    Max,
    /// First non-null value in row order.
    First,
    /// Last non-null value in row order.
    Last,
    /// Arithmetic mean of non-null values.
    Mean,
}

/// One output column of an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationColumn {
    /// Name of the output column.
    pub output: String,
    /// Source column to reduce.
    pub column: String,
    /// Reducer to apply.
    pub reducer: Reducer,
}

impl AggregationColumn {
    /// Reduce `column` with `reducer` into `output`.
    pub fn new(output: impl Into<String>, column: impl Into<String>, reducer: Reducer) -> Self {
        Self {
            output: output.into(),
            column: column.into(),
            reducer,
        }
    }
}

/// Which edge of a bucket interval is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Closed {
    /// `[start, start + width)`
    #[default]
    Left,
    /// `(start, start + width]`
    Right,
}

/// Bucketing of rows by the index column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleSpec {
    /// Bucket width.
    pub rule: TimeBucket,
    /// Inclusive edge of each bucket.
    #[serde(default)]
    pub closed: Closed,
    /// Emit empty buckets between the first and last occupied bucket.
    #[serde(default)]
    pub fill_empty: bool,
}

impl ResampleSpec {
    /// Left-closed buckets of width `rule`, empty buckets omitted.
    pub fn new(rule: TimeBucket) -> Self {
        Self {
            rule,
            closed: Closed::Left,
            fill_empty: false,
        }
    }

    /// Set the inclusive edge.
    pub fn closed(mut self, closed: Closed) -> Self {
        self.closed = closed;
        self
    }

    /// Set whether empty buckets are emitted.
    pub fn fill_empty(mut self, fill_empty: bool) -> Self {
        self.fill_empty = fill_empty;
        self
    }
}

/// Filter, resample and aggregation stages of a read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Row predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    /// Bucketing rule; requires a non-empty aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resample: Option<ResampleSpec>,
    /// Output columns, in output order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregation: Vec<AggregationColumn>,
}

impl QuerySpec {
    /// An empty query (every stage is a no-op).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the row predicate.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(expr);
        self
    }

    /// Set the bucketing rule.
    pub fn resample(mut self, resample: ResampleSpec) -> Self {
        self.resample = Some(resample);
        self
    }

    /// Append an aggregation output column.
    pub fn aggregate(
        mut self,
        output: impl Into<String>,
        column: impl Into<String>,
        reducer: Reducer,
    ) -> Self {
        self.aggregation
            .push(AggregationColumn::new(output, column, reducer));
        self
    }

    /// Reject structurally malformed specs before any data is touched.
    pub fn validate(&self) -> QueryResult<()> {
        if let Some(reason) = self.filter.as_ref().and_then(Expr::structural_error) {
            return invalid(reason);
        }
        if let Some(resample) = &self.resample {
            if self.aggregation.is_empty() {
                return invalid("resample requires at least one aggregation");
            }
            if resample.rule.len_secs() <= 0 {
                return invalid(format!("resample rule {} has zero width", resample.rule));
            }
        }
        let mut outputs = HashSet::new();
        for agg in &self.aggregation {
            if agg.output.is_empty() || agg.column.is_empty() {
                return invalid("aggregation output and column names must not be empty");
            }
            if !outputs.insert(agg.output.as_str()) {
                return invalid(format!("duplicate aggregation output {}", agg.output));
            }
        }
        Ok(())
    }
}

/// Inclusive bounds on the index column; an open side is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    /// Earliest instant to keep.
    pub start: Option<DateTime<Utc>>,
    /// Latest instant to keep.
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// `[start, end]`
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// `[start, ∞)`
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// `(-∞, end]`
    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }
}

/// Half-open row position bounds; negative positions count from the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowRange {
    /// First row to keep (default 0).
    pub start: Option<i64>,
    /// Row to stop before (default: table length).
    pub end: Option<i64>,
}

impl RowRange {
    /// `[start, end)`
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// Resolve against a table of `total` rows, clamping to the table.
    pub fn resolve(&self, total: u64) -> Range<u64> {
        let total_i = i128::from(total);
        let clamp = |pos: i64| -> u64 {
            let pos = i128::from(pos);
            let abs = if pos < 0 { total_i + pos } else { pos };
            // Clamped into [0, total], so the narrowing cannot fail.
            u64::try_from(abs.clamp(0, total_i)).unwrap_or(total)
        };
        let start = self.start.map_or(0, clamp);
        let end = self.end.map_or(total, clamp);
        start..end.max(start)
    }
}
