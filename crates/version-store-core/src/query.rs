//! Query pipeline: filtering, projection, date-range pruning, resampling and
//! aggregation over a resolved version's column table.
//!
//! The public surface is plain, serializable data ([`QuerySpec`], [`Expr`],
//! [`ResampleSpec`], [`DateRange`], [`RowRange`]) plus [`execute`], which
//! applies a [`ReadPlan`] to a [`ColumnTable`](crate::table::ColumnTable).

mod aggregate;
pub mod error;
pub mod expr;
mod filter;
pub mod pipeline;
mod resample;
pub mod spec;
pub mod time_bucket;

pub use error::{QueryError, QueryResult};
pub use expr::{CompareOp, Expr, Literal, Operand};
pub use pipeline::{ReadPlan, execute};
pub use spec::{AggregationColumn, Closed, DateRange, QuerySpec, Reducer, ResampleSpec, RowRange};
pub use time_bucket::{ParseTimeBucketError, TimeBucket};
