//! The column table: the unit of data a version carries.
//!
//! A [`ColumnTable`] is an Arrow [`RecordBatch`] whose columns use one of the
//! five supported semantic types ([`ColumnType`]), plus an optional index
//! column. The index, when present, is a null-free timestamp column sorted in
//! non-decreasing order; date-range reads and resampling work against it.

use std::{collections::HashSet, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::cast,
    datatypes::{DataType, Field, Int64Type, Schema, SchemaRef, TimeUnit},
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidTableSnafu, StoreResult};

/// Resolution of a timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampUnit {
    /// Whole seconds.
    Second,
    /// Milliseconds.
    Millisecond,
    /// Microseconds.
    Microsecond,
    /// Nanoseconds.
    Nanosecond,
}

impl TimestampUnit {
    /// Number of column ticks in one second.
    pub fn ticks_per_second(self) -> i64 {
        match self {
            TimestampUnit::Second => 1,
            TimestampUnit::Millisecond => 1_000,
            TimestampUnit::Microsecond => 1_000_000,
            TimestampUnit::Nanosecond => 1_000_000_000,
        }
    }

    /// Convert a UTC instant into ticks of this unit (truncating).
    ///
    /// Returns `None` if the instant does not fit in an `i64` of this unit.
    pub fn from_datetime(self, ts: DateTime<Utc>) -> Option<i64> {
        match self {
            TimestampUnit::Second => Some(ts.timestamp()),
            TimestampUnit::Millisecond => Some(ts.timestamp_millis()),
            TimestampUnit::Microsecond => Some(ts.timestamp_micros()),
            TimestampUnit::Nanosecond => ts.timestamp_nanos_opt(),
        }
    }

    /// Convert ticks of this unit back into a UTC instant.
    pub fn to_datetime(self, value: i64) -> Option<DateTime<Utc>> {
        let per_sec = self.ticks_per_second();
        let secs = value.div_euclid(per_sec);
        let nanos = value.rem_euclid(per_sec) * (1_000_000_000 / per_sec);
        Utc.timestamp_opt(secs, u32::try_from(nanos).ok()?).single()
    }

    fn to_arrow(self) -> TimeUnit {
        match self {
            TimestampUnit::Second => TimeUnit::Second,
            TimestampUnit::Millisecond => TimeUnit::Millisecond,
            TimestampUnit::Microsecond => TimeUnit::Microsecond,
            TimestampUnit::Nanosecond => TimeUnit::Nanosecond,
        }
    }

    fn from_arrow(unit: &TimeUnit) -> Self {
        match unit {
            TimeUnit::Second => TimestampUnit::Second,
            TimeUnit::Millisecond => TimestampUnit::Millisecond,
            TimeUnit::Microsecond => TimestampUnit::Microsecond,
            TimeUnit::Nanosecond => TimestampUnit::Nanosecond,
        }
    }
}

/// Semantic type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ColumnType {
    /// 64-bit signed integers (`Int64`).
    Integer,
    /// 64-bit floats (`Float64`).
    Float,
    /// UTF-8 strings (`Utf8`).
    String,
    /// Booleans.
    Boolean,
    /// Timestamps with a resolution and optional timezone.
    Timestamp {
        /// Tick resolution.
        unit: TimestampUnit,
        /// Timezone annotation, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl ColumnType {
    /// Map an Arrow type onto a column type; `None` for unsupported types.
    pub fn from_arrow(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Int64 => Some(ColumnType::Integer),
            DataType::Float64 => Some(ColumnType::Float),
            DataType::Utf8 => Some(ColumnType::String),
            DataType::Boolean => Some(ColumnType::Boolean),
            DataType::Timestamp(unit, tz) => Some(ColumnType::Timestamp {
                unit: TimestampUnit::from_arrow(unit),
                timezone: tz.as_ref().map(|t| t.to_string()),
            }),
            _ => None,
        }
    }

    /// The Arrow type used to hold columns of this type.
    pub fn to_arrow(&self) -> DataType {
        match self {
            ColumnType::Integer => DataType::Int64,
            ColumnType::Float => DataType::Float64,
            ColumnType::String => DataType::Utf8,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Timestamp { unit, timezone } => {
                DataType::Timestamp(unit.to_arrow(), timezone.as_deref().map(Arc::from))
            }
        }
    }
}

/// Name, type and nullability of one column, as persisted in version records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Whether the column may contain nulls.
    pub nullable: bool,
}

/// Rebuild an Arrow schema from persisted column descriptors.
pub(crate) fn schema_from_descriptors(columns: &[ColumnDescriptor]) -> SchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| {
                Field::new(&c.name, c.column_type.to_arrow(), c.nullable)
            })
            .collect::<Vec<_>>(),
    ))
}

/// Read a timestamp (or integer) array as raw `i64` ticks.
pub(crate) fn ticks(array: &ArrayRef) -> Result<Vec<i64>, ArrowError> {
    let ints = cast(array, &DataType::Int64)?;
    Ok(ints.as_primitive::<Int64Type>().values().to_vec())
}

/// A typed, immutable table with an optional sorted timestamp index.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTable {
    batch: RecordBatch,
    index: Option<String>,
}

impl ColumnTable {
    /// Build a table from `batch`, using the column named `index` (if any)
    /// as the timestamp index.
    ///
    /// # Errors
    /// [`StoreError::InvalidTable`](crate::error::StoreError::InvalidTable)
    /// when a column type is unsupported, column names repeat, or the index
    /// column is missing, not a timestamp, contains nulls, or is unsorted.
    pub fn new(batch: RecordBatch, index: Option<&str>) -> StoreResult<Self> {
        let schema = batch.schema();
        let mut seen = HashSet::new();
        for field in schema.fields() {
            if ColumnType::from_arrow(field.data_type()).is_none() {
                return InvalidTableSnafu {
                    reason: format!(
                        "column {} has unsupported type {}",
                        field.name(),
                        field.data_type()
                    ),
                }
                .fail();
            }
            if !seen.insert(field.name().as_str()) {
                return InvalidTableSnafu {
                    reason: format!("duplicate column name {}", field.name()),
                }
                .fail();
            }
        }

        if let Some(name) = index {
            let Some((pos, field)) = schema.column_with_name(name) else {
                return InvalidTableSnafu {
                    reason: format!("index column {name} is not in the table"),
                }
                .fail();
            };
            if !matches!(field.data_type(), DataType::Timestamp(_, _)) {
                return InvalidTableSnafu {
                    reason: format!("index column {name} must be a timestamp"),
                }
                .fail();
            }
            let column = batch.column(pos);
            if column.null_count() > 0 {
                return InvalidTableSnafu {
                    reason: format!("index column {name} contains nulls"),
                }
                .fail();
            }
            let values = ticks(column).map_err(|e| {
                InvalidTableSnafu {
                    reason: format!("index column {name} is unreadable: {e}"),
                }
                .build()
            })?;
            if values.windows(2).any(|w| w[0] > w[1]) {
                return InvalidTableSnafu {
                    reason: format!("index column {name} is not sorted ascending"),
                }
                .fail();
            }
        }

        Ok(Self {
            batch,
            index: index.map(str::to_string),
        })
    }

    /// Build a table with no index.
    pub fn without_index(batch: RecordBatch) -> StoreResult<Self> {
        Self::new(batch, None)
    }

    pub(crate) fn from_parts(batch: RecordBatch, index: Option<String>) -> Self {
        Self { batch, index }
    }

    /// The underlying Arrow batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Consume the table and return the Arrow batch.
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Name of the index column, if the table has one.
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Persistable descriptors of every column.
    pub fn descriptors(&self) -> Vec<ColumnDescriptor> {
        self.batch
            .schema()
            .fields()
            .iter()
            .filter_map(|f| {
                ColumnType::from_arrow(f.data_type()).map(|column_type| ColumnDescriptor {
                    name: f.name().clone(),
                    column_type,
                    nullable: f.is_nullable(),
                })
            })
            .collect()
    }

    /// Unit of the index column, if there is one.
    pub(crate) fn index_unit(&self) -> Option<TimestampUnit> {
        let name = self.index.as_deref()?;
        match self.batch.schema().field_with_name(name).ok()?.data_type() {
            DataType::Timestamp(unit, _) => Some(TimestampUnit::from_arrow(unit)),
            _ => None,
        }
    }

    /// The index column as raw ticks.
    pub(crate) fn index_ticks(&self) -> Option<Result<Vec<i64>, ArrowError>> {
        let name = self.index.as_deref()?;
        let column = self.batch.column_by_name(name)?;
        Some(ticks(column))
    }
}
