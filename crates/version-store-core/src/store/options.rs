//! Read-side options.

use serde::{Deserialize, Serialize};

use crate::{
    query::{DateRange, QueryResult, QuerySpec, ReadPlan, RowRange, error::invalid},
    version_chain::VersionSelector,
};

/// How to resolve and shape a read.
///
/// Serializable so that one set of options can be shared across the symbols
/// of a batch read or shipped between processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Which version to read.
    pub selector: VersionSelector,
    /// Columns to return, in table order; the index is always returned.
    pub columns: Option<Vec<String>>,
    /// Inclusive bounds on the index column.
    pub date_range: Option<DateRange>,
    /// Row position bounds, applied before anything else.
    pub row_range: Option<RowRange>,
    /// Filter, resample and aggregation stages.
    pub query: Option<QuerySpec>,
}

impl ReadOptions {
    /// Read the latest version unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the version picked by `selector`.
    pub fn selector(mut self, selector: impl Into<VersionSelector>) -> Self {
        self.selector = selector.into();
        self
    }

    /// Only return `columns` (plus the index).
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict rows to an index range.
    pub fn date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Restrict rows to a position range.
    pub fn row_range(mut self, range: RowRange) -> Self {
        self.row_range = Some(range);
        self
    }

    /// Run `query` over the rows.
    pub fn query(mut self, query: QuerySpec) -> Self {
        self.query = Some(query);
        self
    }

    /// Reject option combinations that cannot be executed.
    pub fn validate(&self) -> QueryResult<()> {
        if self.row_range.is_some() && self.date_range.is_some() {
            return invalid("row_range and date_range are mutually exclusive");
        }
        if let Some(DateRange {
            start: Some(start),
            end: Some(end),
        }) = self.date_range
        {
            if start > end {
                return invalid(format!("date range starts at {start}, after its end {end}"));
            }
        }
        match &self.query {
            Some(query) => query.validate(),
            None => Ok(()),
        }
    }

    pub(crate) fn plan(&self) -> ReadPlan<'_> {
        ReadPlan {
            date_range: self.date_range.as_ref(),
            columns: self.columns.as_deref(),
            query: self.query.as_ref(),
        }
    }
}
