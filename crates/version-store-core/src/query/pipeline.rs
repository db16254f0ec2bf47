//! Stage driver of the query pipeline.
//!
//! Stages run in a fixed order, each one optional:
//!
//! 1. date-range pruning on the sorted index (binary search, then slice),
//! 2. row filtering with an [`Expr`](super::Expr) mask,
//! 3. column projection,
//! 4. resample bucketing,
//! 5. aggregation.
//!
//! Row-range restriction happens before stage 1, while the store assembles
//! the table from its segments. Every stage is pure: the source table is
//! never modified and no I/O happens here.

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, Int64Array},
    compute::cast,
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use log::debug;
use snafu::prelude::*;

use super::{
    aggregate,
    error::{ArrowSnafu, ColumnNotFoundSnafu, QueryResult, invalid},
    filter::{self, column_ref},
    resample::{self, Buckets},
    spec::{DateRange, QuerySpec},
};
use crate::table::{ColumnTable, TimestampUnit};

/// Everything the pipeline needs to know about one read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadPlan<'a> {
    /// Inclusive bounds on the index column.
    pub date_range: Option<&'a DateRange>,
    /// Columns to keep (the index is always kept).
    pub columns: Option<&'a [String]>,
    /// Filter, resample and aggregation stages.
    pub query: Option<&'a QuerySpec>,
}

impl ReadPlan<'_> {
    /// True when no stage would change the table.
    pub(crate) fn is_identity(&self) -> bool {
        self.date_range.is_none()
            && self.columns.is_none()
            && self
                .query
                .is_none_or(|q| q.filter.is_none() && q.aggregation.is_empty())
    }
}

/// Index bounds of a date range in ticks of `unit`; `None` sides are open.
///
/// The start is rounded up and the end rounded down so that truncation to
/// the column resolution never widens the range.
pub(crate) fn range_ticks(
    range: &DateRange,
    unit: TimestampUnit,
) -> QueryResult<(Option<i64>, Option<i64>)> {
    let convert = |ts: DateTime<Utc>, round_up: bool| -> QueryResult<i64> {
        let Some(ticks) = unit.from_datetime(ts) else {
            return invalid(format!("date bound {ts} is out of range for the index"));
        };
        let exact = unit.to_datetime(ticks) == Some(ts);
        Ok(if round_up && !exact {
            ticks.saturating_add(1)
        } else {
            ticks
        })
    };
    let start = range.start.map(|ts| convert(ts, true)).transpose()?;
    let end = range.end.map(|ts| convert(ts, false)).transpose()?;
    Ok((start, end))
}

/// Run every requested stage over `table`.
pub fn execute(table: ColumnTable, plan: &ReadPlan<'_>) -> QueryResult<ColumnTable> {
    if let Some(query) = plan.query {
        query.validate()?;
    }
    if plan.is_identity() {
        return Ok(table);
    }
    let index = table.index().map(str::to_string);

    let mut batch = table.into_batch();

    if let Some(range) = plan.date_range {
        batch = prune_dates(batch, index.as_deref(), range)?;
    }

    if let Some(expr) = plan.query.and_then(|q| q.filter.as_ref()) {
        batch = filter::apply_filter(&batch, expr)?;
    }

    if let Some(columns) = plan.columns {
        batch = project(&batch, index.as_deref(), columns)?;
    }

    match plan.query {
        Some(query) if !query.aggregation.is_empty() => {
            aggregate_batch(&batch, index.as_deref(), query)
        }
        _ => Ok(ColumnTable::from_parts(batch, index)),
    }
}

fn prune_dates(
    batch: RecordBatch,
    index: Option<&str>,
    range: &DateRange,
) -> QueryResult<RecordBatch> {
    let Some(index) = index else {
        return invalid("date_range requires an indexed table");
    };
    let table = ColumnTable::from_parts(batch, Some(index.to_string()));
    let unit = table
        .index_unit()
        .context(ColumnNotFoundSnafu { column: index })?;
    let ticks = index_ticks(&table, index)?;
    let (start, end) = range_ticks(range, unit)?;

    let lo = start.map_or(0, |s| ticks.partition_point(|v| *v < s));
    let hi = end.map_or(ticks.len(), |e| ticks.partition_point(|v| *v <= e));
    let batch = table.into_batch();
    debug!("date range kept rows {lo}..{hi} of {}", ticks.len());
    Ok(batch.slice(lo, hi.saturating_sub(lo)))
}

fn index_ticks(table: &ColumnTable, index: &str) -> QueryResult<Vec<i64>> {
    table
        .index_ticks()
        .context(ColumnNotFoundSnafu { column: index })?
        .context(ArrowSnafu {
            context: "reading index",
        })
}

fn project(
    batch: &RecordBatch,
    index: Option<&str>,
    columns: &[String],
) -> QueryResult<RecordBatch> {
    let schema = batch.schema();
    for name in columns {
        ensure!(
            schema.column_with_name(name).is_some(),
            ColumnNotFoundSnafu {
                column: name.as_str(),
            }
        );
    }
    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| {
            Some(f.name().as_str()) == index || columns.contains(f.name())
        })
        .map(|(i, _)| i)
        .collect();
    batch.project(&keep).context(ArrowSnafu {
        context: "projecting columns",
    })
}

fn aggregate_batch(
    batch: &RecordBatch,
    index: Option<&str>,
    query: &QuerySpec,
) -> QueryResult<ColumnTable> {
    let mut fields = Vec::new();
    let mut arrays: Vec<ArrayRef> = Vec::new();

    let (buckets, out_index) = match &query.resample {
        Some(spec) => {
            let Some(index) = index else {
                return invalid("resample requires an indexed table");
            };
            if query.aggregation.iter().any(|a| a.output == index) {
                return invalid(format!(
                    "aggregation output {index} collides with the index column"
                ));
            }
            let table = ColumnTable::from_parts(batch.clone(), Some(index.to_string()));
            let unit = table
                .index_unit()
                .context(ColumnNotFoundSnafu { column: index })?;
            let buckets = resample::assign(&index_ticks(&table, index)?, spec, unit)?;

            let index_field = batch.schema().field_with_name(index).cloned().context(ArrowSnafu {
                context: "locating index",
            })?;
            let starts: ArrayRef = Arc::new(Int64Array::from(buckets.starts.clone()));
            let starts = cast(&starts, index_field.data_type()).context(ArrowSnafu {
                context: "building bucket index",
            })?;
            fields.push(Field::new(index, index_field.data_type().clone(), false));
            arrays.push(starts);
            (buckets, Some(index.to_string()))
        }
        None => (
            Buckets {
                starts: vec![0],
                rows: vec![0..batch.num_rows()],
            },
            None,
        ),
    };

    for agg in &query.aggregation {
        let column = column_ref(batch, &agg.column)?;
        let (field, values) = aggregate::reduce(agg, column, &buckets.rows)?;
        fields.push(field);
        arrays.push(values);
    }

    let out = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).context(ArrowSnafu {
        context: "assembling aggregation output",
    })?;
    Ok(ColumnTable::from_parts(out, out_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{
        error::QueryError,
        expr::{CompareOp, Expr},
        spec::{Closed, Reducer, ResampleSpec},
        time_bucket::TimeBucket,
    };
    use arrow::{
        array::{Array, AsArray, Float64Array, StringArray, TimestampSecondArray},
        datatypes::{Float64Type, Int64Type},
    };
    use chrono::TimeZone;

    const DAY: i64 = 86_400;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("ts")
    }

    fn daily(n: i64) -> ColumnTable {
        let ts = TimestampSecondArray::from_iter_values((0..n).map(|d| d * DAY));
        let px = Float64Array::from_iter_values((0..n).map(|i| i as f64 / 2.0));
        let tag = StringArray::from_iter_values(
            (0..n).map(|i| if i % 2 == 0 { "even" } else { "odd" }),
        );
        let batch = RecordBatch::try_from_iter(vec![
            ("ts", Arc::new(ts.with_timezone("UTC")) as ArrayRef),
            ("x", Arc::new(Int64Array::from_iter_values(0..n)) as ArrayRef),
            ("px", Arc::new(px) as ArrayRef),
            ("tag", Arc::new(tag) as ArrayRef),
        ])
        .expect("batch");
        ColumnTable::new(batch, Some("ts")).expect("table")
    }

    fn xs(table: &ColumnTable) -> Vec<i64> {
        table
            .batch()
            .column_by_name("x")
            .expect("x")
            .as_primitive::<Int64Type>()
            .values()
            .to_vec()
    }

    #[test]
    fn identity_plan_returns_the_input() {
        let table = daily(5);
        assert!(ReadPlan::default().is_identity());
        let same = execute(table.clone(), &ReadPlan::default()).expect("run");
        assert_eq!(same, table);

        let empty = QuerySpec::new();
        let plan = ReadPlan {
            query: Some(&empty),
            ..Default::default()
        };
        assert!(plan.is_identity());
        assert_eq!(execute(table.clone(), &plan).expect("run"), table);

        let filtered = QuerySpec::new().filter(Expr::is_not_null("x"));
        let plan = ReadPlan {
            query: Some(&filtered),
            ..Default::default()
        };
        assert!(!plan.is_identity());
    }

    #[test]
    fn invalid_queries_fail_before_any_stage() {
        let query = QuerySpec::new()
            .resample(ResampleSpec::new(TimeBucket::Seconds(0)))
            .aggregate("n", "x", Reducer::Count);
        let plan = ReadPlan {
            query: Some(&query),
            ..Default::default()
        };
        let err = execute(daily(3), &plan).expect_err("zero width");
        assert!(matches!(err, QueryError::InvalidQuery { .. }));
    }

    #[test]
    fn date_range_is_inclusive_on_both_ends() {
        let range = DateRange::between(ts(2 * DAY), ts(5 * DAY));
        let plan = ReadPlan {
            date_range: Some(&range),
            ..Default::default()
        };
        let out = execute(daily(100), &plan).expect("run");
        assert_eq!(xs(&out), vec![2, 3, 4, 5]);
    }

    #[test]
    fn date_range_rounds_inward_and_may_be_empty() {
        // One second past day 2 midnight, so day 2 itself is excluded.
        let range = DateRange::between(ts(2 * DAY + 1), ts(3 * DAY));
        let plan = ReadPlan {
            date_range: Some(&range),
            ..Default::default()
        };
        assert_eq!(xs(&execute(daily(10), &plan).expect("run")), vec![3]);

        let range = DateRange::between(ts(50 * DAY), ts(60 * DAY));
        let plan = ReadPlan {
            date_range: Some(&range),
            ..Default::default()
        };
        let out = execute(daily(10), &plan).expect("run");
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.column_names(), daily(1).column_names());
    }

    #[test]
    fn projection_keeps_table_order_and_the_index() {
        let cols = vec!["tag".to_string(), "x".to_string()];
        let plan = ReadPlan {
            columns: Some(&cols),
            ..Default::default()
        };
        let out = execute(daily(3), &plan).expect("run");
        assert_eq!(out.column_names(), vec!["ts", "x", "tag"]);

        let cols = vec!["nope".to_string()];
        let plan = ReadPlan {
            columns: Some(&cols),
            ..Default::default()
        };
        let err = execute(daily(3), &plan).expect_err("unknown column");
        assert!(matches!(err, QueryError::ColumnNotFound { .. }));
    }

    #[test]
    fn filter_runs_before_projection() {
        let cols = vec!["px".to_string()];
        let query = QuerySpec::new().filter(Expr::compare("tag", CompareOp::Eq, "odd"));
        let plan = ReadPlan {
            columns: Some(&cols),
            query: Some(&query),
            ..Default::default()
        };
        let out = execute(daily(6), &plan).expect("run");
        assert_eq!(out.column_names(), vec!["ts", "px"]);
        assert_eq!(
            out.batch().column(1).as_primitive::<Float64Type>().values().to_vec(),
            vec![0.5, 1.5, 2.5]
        );
    }

    #[test]
    fn resample_then_aggregate_per_bucket() {
        let batch = RecordBatch::try_from_iter(vec![
            ("t", Arc::new(TimestampSecondArray::from(vec![0, 0, 1])) as ArrayRef),
            ("x", Arc::new(Int64Array::from(vec![1, 3, 5])) as ArrayRef),
        ])
        .expect("batch");
        let table = ColumnTable::new(batch, Some("t")).expect("table");
        let query = QuerySpec::new()
            .resample(ResampleSpec::new(TimeBucket::Seconds(1)))
            .aggregate("sum_x", "x", Reducer::Sum)
            .aggregate("n", "x", Reducer::Count);
        let plan = ReadPlan {
            query: Some(&query),
            ..Default::default()
        };
        let out = execute(table, &plan).expect("run");

        assert_eq!(out.index(), Some("t"));
        assert_eq!(out.column_names(), vec!["t", "sum_x", "n"]);
        let starts = crate::table::ticks(out.batch().column(0)).expect("ticks");
        assert_eq!(starts, vec![0, 1]);
        let sums = out.batch().column(1).as_primitive::<Int64Type>();
        assert_eq!(sums.values().to_vec(), vec![4, 5]);
        let counts = out.batch().column(2).as_primitive::<Int64Type>();
        assert_eq!(counts.values().to_vec(), vec![2, 1]);
    }

    #[test]
    fn filled_buckets_count_zero_and_reduce_to_null() {
        let query = QuerySpec::new()
            .resample(
                ResampleSpec::new(TimeBucket::Days(1))
                    .closed(Closed::Left)
                    .fill_empty(true),
            )
            .aggregate("n", "x", Reducer::Count)
            .aggregate("last", "x", Reducer::Last);
        let filter = Expr::or([
            Expr::compare("x", CompareOp::Eq, 0i64),
            Expr::compare("x", CompareOp::Eq, 3i64),
        ]);
        let query = query.filter(filter);
        let plan = ReadPlan {
            query: Some(&query),
            ..Default::default()
        };
        let out = execute(daily(5), &plan).expect("run");

        assert_eq!(out.num_rows(), 4);
        let n = out.batch().column(1).as_primitive::<Int64Type>();
        assert_eq!(n.values().to_vec(), vec![1, 0, 0, 1]);
        let last = out.batch().column(2).as_primitive::<Int64Type>();
        assert!(last.is_valid(0) && last.is_null(1) && last.is_null(2));
        assert_eq!(last.value(3), 3);
    }

    #[test]
    fn aggregation_without_resample_yields_one_row() {
        let query = QuerySpec::new()
            .aggregate("mean_px", "px", Reducer::Mean)
            .aggregate("first_tag", "tag", Reducer::First);
        let plan = ReadPlan {
            query: Some(&query),
            ..Default::default()
        };
        let out = execute(daily(4), &plan).expect("run");
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.index(), None);
        let mean = out.batch().column(0).as_primitive::<Float64Type>();
        assert_eq!(mean.value(0), 0.75);
        assert_eq!(out.batch().column(1).as_string::<i32>().value(0), "even");
    }

    #[test]
    fn unindexed_tables_reject_time_stages() {
        let batch = RecordBatch::try_from_iter(vec![(
            "x",
            Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
        )])
        .expect("batch");
        let table = ColumnTable::without_index(batch).expect("table");

        let range = DateRange::since(ts(0));
        let plan = ReadPlan {
            date_range: Some(&range),
            ..Default::default()
        };
        let err = execute(table.clone(), &plan).expect_err("no index");
        assert!(matches!(err, QueryError::InvalidQuery { .. }));

        let query = QuerySpec::new()
            .resample(ResampleSpec::new(TimeBucket::Seconds(1)))
            .aggregate("n", "x", Reducer::Count);
        let plan = ReadPlan {
            query: Some(&query),
            ..Default::default()
        };
        let err = execute(table, &plan).expect_err("no index");
        assert!(matches!(err, QueryError::InvalidQuery { .. }));
    }
}
