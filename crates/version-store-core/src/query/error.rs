//! Errors raised while validating or executing a query.

use arrow::{datatypes::DataType, error::ArrowError};
use snafu::prelude::*;

use super::spec::Reducer;

/// Errors from the query pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    /// A query or projection named a column the table does not have.
    #[snafu(display("Column not found: {column}"))]
    ColumnNotFound {
        /// The missing column name.
        column: String,
    },

    /// The query is structurally malformed or its operands do not type-check
    /// against the table.
    #[snafu(display("Invalid query: {reason}"))]
    InvalidQuery {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// The reducer cannot be applied to the column's type.
    #[snafu(display(
        "Reducer {reducer:?} is not supported for column {column} of type {data_type}"
    ))]
    UnsupportedAggregation {
        /// The requested reducer.
        reducer: Reducer,
        /// Source column of the aggregation.
        column: String,
        /// Arrow type of the source column.
        data_type: DataType,
    },

    /// An Arrow compute kernel failed.
    #[snafu(display("Arrow error while {context}: {source}"))]
    Arrow {
        /// What the pipeline was doing.
        context: &'static str,
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

pub(crate) fn invalid<T>(reason: impl Into<String>) -> QueryResult<T> {
    InvalidQuerySnafu {
        reason: reason.into(),
    }
    .fail()
}
