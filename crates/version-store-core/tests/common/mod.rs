//! Shared table builders for the integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use arrow::{
    array::{
        ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray,
    },
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, TimeZone, Utc};
use version_store_core::table::ColumnTable;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const DAY_MS: i64 = 86_400_000;

/// Midnight UTC of day `n` counted from 2024-01-01.
pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(n)
}

/// `n` daily rows starting at `day(first)`: `ts`, `px = day number`, `qty = 10 * day`.
pub fn daily(first: i64, n: i64) -> ColumnTable {
    let days: Vec<i64> = (first..first + n).collect();
    let schema = Arc::new(Schema::new(vec![
        Field::new(
            "ts",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("px", DataType::Float64, true),
        Field::new("qty", DataType::Int64, true),
    ]));
    let ts: ArrayRef = Arc::new(TimestampMillisecondArray::from_iter_values(
        days.iter().map(|d| day(*d).timestamp_millis()),
    ));
    let px: ArrayRef = Arc::new(Float64Array::from_iter_values(
        days.iter().map(|d| *d as f64),
    ));
    let qty: ArrayRef = Arc::new(Int64Array::from_iter_values(days.iter().map(|d| d * 10)));
    let batch = RecordBatch::try_new(schema, vec![ts, px, qty]).unwrap();
    ColumnTable::new(batch, Some("ts")).unwrap()
}

/// An unindexed table mixing every supported non-timestamp type, with nulls.
pub fn mixed() -> ColumnTable {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("score", DataType::Float64, true),
        Field::new("active", DataType::Boolean, true),
    ]));
    let name = StringArray::from(vec![Some("ann"), None, Some("cy"), Some("dee")]);
    let score = Float64Array::from(vec![Some(1.5), Some(2.5), None, Some(4.0)]);
    let active = BooleanArray::from(vec![Some(true), Some(false), None, Some(true)]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![1, 2, 3, 4])),
        Arc::new(name),
        Arc::new(score),
        Arc::new(active),
    ];
    ColumnTable::without_index(RecordBatch::try_new(schema, columns).unwrap()).unwrap()
}

/// Timestamps (in seconds) and integer values, indexed by `t`.
pub fn ticks(rows: &[(i64, Option<i64>)]) -> ColumnTable {
    let rows: Vec<(i64, Option<i64>)> = rows.iter().map(|(t, x)| (t * 1_000, *x)).collect();
    ticks_ms(&rows)
}

/// Like [`ticks`], with the timestamps given in raw milliseconds.
pub fn ticks_ms(rows: &[(i64, Option<i64>)]) -> ColumnTable {
    let schema = Arc::new(Schema::new(vec![
        Field::new("t", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new("x", DataType::Int64, true),
    ]));
    let t: ArrayRef = Arc::new(TimestampMillisecondArray::from_iter_values(
        rows.iter().map(|(t, _)| *t),
    ));
    let x: ArrayRef = Arc::new(Int64Array::from(
        rows.iter().map(|(_, x)| *x).collect::<Vec<_>>(),
    ));
    ColumnTable::new(RecordBatch::try_new(schema, vec![t, x]).unwrap(), Some("t")).unwrap()
}

pub fn int_column(table: &ColumnTable, name: &str) -> Vec<Option<i64>> {
    let col = table.batch().column_by_name(name).expect("column");
    let col = col.as_any().downcast_ref::<Int64Array>().expect("int64");
    col.iter().collect()
}

pub fn ts_column(table: &ColumnTable, name: &str) -> Vec<i64> {
    let col = table.batch().column_by_name(name).expect("column");
    let col = col
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .expect("timestamp");
    col.values().to_vec()
}
