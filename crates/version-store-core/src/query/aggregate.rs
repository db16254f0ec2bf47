//! Reducers applied per bucket.
//!
//! Every reducer consumes a list of contiguous row ranges (one per output
//! row) over the source column. Nulls are skipped; a bucket with no non-null
//! input produces null, except for `count`, which produces 0.

use std::{ops::Range, sync::Arc};

use arrow::{
    array::{
        Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
        UInt64Array,
    },
    compute::{cast, max, max_boolean, max_string, min, min_boolean, min_string, sum, take},
    datatypes::{DataType, Field, Float64Type, Int64Type},
};
use snafu::prelude::*;

use super::{
    error::{ArrowSnafu, QueryResult, UnsupportedAggregationSnafu},
    spec::{AggregationColumn, Reducer},
};

fn supported(reducer: Reducer, data_type: &DataType) -> bool {
    match reducer {
        Reducer::Count | Reducer::First | Reducer::Last => true,
        Reducer::Sum | Reducer::Mean => matches!(data_type, DataType::Int64 | DataType::Float64),
        Reducer::Min | Reducer::Max => matches!(
            data_type,
            DataType::Int64
                | DataType::Float64
                | DataType::Utf8
                | DataType::Boolean
                | DataType::Timestamp(_, _)
        ),
    }
}

/// Reduce `column` over each of `buckets`, producing the output field and
/// one value per bucket.
pub(crate) fn reduce(
    agg: &AggregationColumn,
    column: &ArrayRef,
    buckets: &[Range<usize>],
) -> QueryResult<(Field, ArrayRef)> {
    let data_type = column.data_type();
    ensure!(
        supported(agg.reducer, data_type),
        UnsupportedAggregationSnafu {
            reducer: agg.reducer,
            column: agg.column.as_str(),
            data_type: data_type.clone(),
        }
    );

    let values: ArrayRef = match agg.reducer {
        Reducer::Count => Arc::new(Int64Array::from_iter_values(buckets.iter().map(|r| {
            let slice = column.slice(r.start, r.len());
            (slice.len() - slice.null_count()) as i64
        }))),
        Reducer::Sum => sum_buckets(column, buckets)?,
        Reducer::Mean => mean_buckets(column, buckets)?,
        Reducer::Min => extreme_buckets(column, buckets, Extreme::Min)?,
        Reducer::Max => extreme_buckets(column, buckets, Extreme::Max)?,
        Reducer::First => pick_buckets(column, buckets, Pick::First)?,
        Reducer::Last => pick_buckets(column, buckets, Pick::Last)?,
    };

    let nullable = agg.reducer != Reducer::Count;
    let field = Field::new(&agg.output, values.data_type().clone(), nullable);
    Ok((field, values))
}

fn sum_buckets(column: &ArrayRef, buckets: &[Range<usize>]) -> QueryResult<ArrayRef> {
    match column.data_type() {
        DataType::Int64 => {
            let ints = column.as_primitive::<Int64Type>();
            let mut out = Vec::with_capacity(buckets.len());
            for r in buckets {
                let slice = ints.slice(r.start, r.len());
                // Wrapping would silently corrupt the result.
                let value = arrow::compute::sum_checked(&slice).context(ArrowSnafu {
                    context: "summing integers",
                })?;
                out.push(value);
            }
            Ok(Arc::new(Int64Array::from(out)))
        }
        _ => {
            let floats = column.as_primitive::<Float64Type>();
            Ok(Arc::new(Float64Array::from_iter(
                buckets.iter().map(|r| sum(&floats.slice(r.start, r.len()))),
            )))
        }
    }
}

fn mean_buckets(column: &ArrayRef, buckets: &[Range<usize>]) -> QueryResult<ArrayRef> {
    let floats = cast(column, &DataType::Float64).context(ArrowSnafu {
        context: "promoting to float",
    })?;
    let floats = floats.as_primitive::<Float64Type>();
    Ok(Arc::new(Float64Array::from_iter(buckets.iter().map(|r| {
        let slice = floats.slice(r.start, r.len());
        let count = slice.len() - slice.null_count();
        sum(&slice).filter(|_| count > 0).map(|total| total / count as f64)
    }))))
}

#[derive(Clone, Copy)]
enum Extreme {
    Min,
    Max,
}

fn extreme_buckets(
    column: &ArrayRef,
    buckets: &[Range<usize>],
    which: Extreme,
) -> QueryResult<ArrayRef> {
    match column.data_type() {
        DataType::Int64 => {
            let ints = column.as_primitive::<Int64Type>();
            Ok(Arc::new(Int64Array::from_iter(buckets.iter().map(|r| {
                let slice = ints.slice(r.start, r.len());
                match which {
                    Extreme::Min => min(&slice),
                    Extreme::Max => max(&slice),
                }
            }))))
        }
        DataType::Float64 => {
            let floats = column.as_primitive::<Float64Type>();
            Ok(Arc::new(Float64Array::from_iter(buckets.iter().map(|r| {
                let slice = floats.slice(r.start, r.len());
                match which {
                    Extreme::Min => min(&slice),
                    Extreme::Max => max(&slice),
                }
            }))))
        }
        DataType::Utf8 => {
            let strings = column.as_string::<i32>();
            Ok(Arc::new(StringArray::from_iter(buckets.iter().map(|r| {
                let slice = strings.slice(r.start, r.len());
                match which {
                    Extreme::Min => min_string(&slice).map(str::to_string),
                    Extreme::Max => max_string(&slice).map(str::to_string),
                }
            }))))
        }
        DataType::Boolean => {
            let bools = column.as_boolean();
            Ok(Arc::new(BooleanArray::from_iter(buckets.iter().map(|r| {
                let slice = bools.slice(r.start, r.len());
                match which {
                    Extreme::Min => min_boolean(&slice),
                    Extreme::Max => max_boolean(&slice),
                }
            }))))
        }
        timestamp => {
            // Timestamps reduce over their raw ticks and are cast back.
            let ticks = cast(column, &DataType::Int64).context(ArrowSnafu {
                context: "reading timestamp ticks",
            })?;
            let reduced = extreme_buckets(&ticks, buckets, which)?;
            cast(&reduced, timestamp).context(ArrowSnafu {
                context: "restoring timestamp type",
            })
        }
    }
}

#[derive(Clone, Copy)]
enum Pick {
    First,
    Last,
}

fn pick_buckets(column: &ArrayRef, buckets: &[Range<usize>], which: Pick) -> QueryResult<ArrayRef> {
    let indices = UInt64Array::from_iter(buckets.iter().map(|r| {
        let found = match which {
            Pick::First => r.clone().find(|&i| column.is_valid(i)),
            Pick::Last => r.clone().rev().find(|&i| column.is_valid(i)),
        };
        found.map(|i| i as u64)
    }));
    take(column.as_ref(), &indices, None).context(ArrowSnafu {
        context: "picking values",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::TimestampSecondArray;

    use crate::query::error::QueryError;

    fn run(reducer: Reducer, column: ArrayRef, buckets: &[Range<usize>]) -> ArrayRef {
        let agg = AggregationColumn::new("out", "c", reducer);
        reduce(&agg, &column, buckets).expect("reduce").1
    }

    fn ints() -> ArrayRef {
        let values = vec![Some(1), Some(3), None, Some(5), None];
        Arc::new(Int64Array::from(values))
    }

    #[test]
    fn count_sum_mean_skip_nulls() {
        let buckets = [0..2, 2..4, 4..5, 5..5];
        let count = run(Reducer::Count, ints(), &buckets);
        let counts = count.as_primitive::<Int64Type>().values().to_vec();
        assert_eq!(counts, vec![2, 1, 0, 0]);
        let sum = run(Reducer::Sum, ints(), &buckets);
        assert_eq!(
            sum.as_primitive::<Int64Type>(),
            &Int64Array::from(vec![Some(4), Some(5), None, None])
        );
        let mean = run(Reducer::Mean, ints(), &buckets);
        assert_eq!(
            mean.as_primitive::<Float64Type>(),
            &Float64Array::from(vec![Some(2.0), Some(5.0), None, None])
        );
    }

    #[test]
    fn first_last_take_non_null_values_in_row_order() {
        let buckets = [0..3, 2..5];
        let first = run(Reducer::First, ints(), &buckets);
        assert_eq!(
            first.as_primitive::<Int64Type>(),
            &Int64Array::from(vec![Some(1), Some(5)])
        );
        let last = run(Reducer::Last, ints(), &buckets);
        assert_eq!(
            last.as_primitive::<Int64Type>(),
            &Int64Array::from(vec![Some(3), Some(5)])
        );
        assert!(run(Reducer::Last, ints(), &[4..5]).is_null(0));
    }

    #[test]
    fn min_max_cover_strings_booleans_and_timestamps() {
        let strings: ArrayRef = Arc::new(StringArray::from(vec![Some("b"), None, Some("a")]));
        let min = run(Reducer::Min, strings.clone(), &[0..3]);
        assert_eq!(min.as_string::<i32>().value(0), "a");
        let max = run(Reducer::Max, strings, &[0..3]);
        assert_eq!(max.as_string::<i32>().value(0), "b");

        let bools: ArrayRef = Arc::new(BooleanArray::from(vec![true, false]));
        assert!(!run(Reducer::Min, bools, &[0..2]).as_boolean().value(0));

        let secs = TimestampSecondArray::from(vec![5, 2, 9]).with_timezone("UTC");
        let ts: ArrayRef = Arc::new(secs);
        let out = run(Reducer::Max, ts.clone(), &[0..2, 1..3]);
        assert_eq!(out.data_type(), ts.data_type());
        assert_eq!(crate::table::ticks(&out).expect("ticks"), vec![5, 9]);
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        let strings: ArrayRef = Arc::new(StringArray::from(vec!["a"]));
        let sum = AggregationColumn::new("o", "s", Reducer::Sum);
        let err = reduce(&sum, &strings, &[0..1]).expect_err("sum over strings");
        assert!(matches!(err, QueryError::UnsupportedAggregation { .. }));

        let bools: ArrayRef = Arc::new(BooleanArray::from(vec![true]));
        let mean = AggregationColumn::new("o", "b", Reducer::Mean);
        let err = reduce(&mean, &bools, &[0..1]).expect_err("mean over booleans");
        assert!(matches!(err, QueryError::UnsupportedAggregation { .. }));
    }

    #[test]
    fn integer_sum_overflow_is_an_error() {
        let big: ArrayRef = Arc::new(Int64Array::from(vec![i64::MAX, 1]));
        let sum = AggregationColumn::new("o", "x", Reducer::Sum);
        let err = reduce(&sum, &big, &[0..2]).expect_err("overflow");
        assert!(matches!(err, QueryError::Arrow { .. }));
    }
}
