//! Bucket assignment for resampling.
//!
//! The index is sorted, so rows sharing a bucket always form one contiguous
//! run. Assignment is a single pass that cuts the index wherever the bucket
//! start changes.

use std::ops::Range;

use super::{
    error::{QueryResult, invalid},
    spec::{Closed, ResampleSpec},
    time_bucket::{left_bucket_start, right_bucket_start},
};
use crate::table::TimestampUnit;

/// Upper bound on emitted buckets when empty buckets are filled in.
const MAX_FILLED_BUCKETS: i64 = 10_000_000;

/// Output rows of a resample: bucket starts (in index ticks) and the row
/// range of the input that falls in each bucket.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Buckets {
    pub starts: Vec<i64>,
    pub rows: Vec<Range<usize>>,
}

/// Assign every row of the sorted `index` to its bucket.
pub(crate) fn assign(
    index: &[i64],
    spec: &ResampleSpec,
    unit: TimestampUnit,
) -> QueryResult<Buckets> {
    let width = match spec.rule.width_in(unit) {
        Some(width) if width > 0 => width,
        Some(_) => return invalid(format!("bucket width {} must be positive", spec.rule)),
        None => {
            return invalid(format!(
                "bucket width {} overflows the index resolution",
                spec.rule
            ));
        }
    };
    let starts = index
        .iter()
        .map(|&v| {
            let start = match spec.closed {
                Closed::Left => left_bucket_start(v, width),
                Closed::Right => right_bucket_start(v, width),
            };
            start.map_or_else(
                || invalid(format!("index value {v} has no {} bucket", spec.rule)),
                Ok,
            )
        })
        .collect::<QueryResult<Vec<i64>>>()?;

    let mut buckets = Buckets::default();
    let mut run_start = 0;
    for i in 1..=starts.len() {
        if i == starts.len() || starts[i] != starts[run_start] {
            buckets.starts.push(starts[run_start]);
            buckets.rows.push(run_start..i);
            run_start = i;
        }
    }

    if spec.fill_empty {
        fill(buckets, width)
    } else {
        Ok(buckets)
    }
}

fn fill(occupied: Buckets, width: i64) -> QueryResult<Buckets> {
    let (Some(&first), Some(&last)) = (occupied.starts.first(), occupied.starts.last()) else {
        return Ok(occupied);
    };
    let span = (i128::from(last) - i128::from(first)) / i128::from(width) + 1;
    if span > i128::from(MAX_FILLED_BUCKETS) {
        return invalid(format!(
            "filling empty buckets would produce {span} rows (limit {MAX_FILLED_BUCKETS})"
        ));
    }

    let mut filled = Buckets::default();
    let mut occupied = occupied.starts.into_iter().zip(occupied.rows).peekable();
    let mut cursor = 0;
    for k in 0..span as i64 {
        let start = first + k * width;
        match occupied.peek() {
            Some((s, _)) if *s == start => {
                if let Some((s, rows)) = occupied.next() {
                    cursor = rows.end;
                    filled.starts.push(s);
                    filled.rows.push(rows);
                }
            }
            _ => {
                filled.starts.push(start);
                filled.rows.push(cursor..cursor);
            }
        }
    }
    Ok(filled)
}
