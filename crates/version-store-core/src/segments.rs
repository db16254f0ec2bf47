//! Persisted data segments.
//!
//! A version's table is split into row chunks of at most `rows_per_segment`
//! rows. Each chunk is encoded as a Parquet blob and stored under a
//! content-addressed key, so rewriting the same chunk (for example after a
//! retried write) lands on the same key. A [`SegmentRef`] records where the
//! chunk sits in the table and, for indexed tables, the range of index ticks
//! it covers so reads can skip segments outside a date range.

use std::ops::Range;

use arrow::{
    compute::concat_batches,
    datatypes::SchemaRef,
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::Compression,
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    error::{EncodeSnafu, StorageCorruptionSnafu, StoreError, StoreResult},
    layout,
    table::ColumnTable,
};

/// Location and extent of one persisted chunk of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    /// Store key of the Parquet blob.
    pub key: String,
    /// Position of the chunk's first row within the table.
    pub row_offset: u64,
    /// Number of rows in the chunk.
    pub row_count: u64,
    /// Smallest index tick in the chunk (indexed tables only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_min: Option<i64>,
    /// Largest index tick in the chunk (indexed tables only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_max: Option<i64>,
}

impl SegmentRef {
    fn rows(&self) -> Range<u64> {
        self.row_offset..self.row_offset + self.row_count
    }
}

/// Content-derived identifier for a segment blob: `seg-` plus 32 hex chars
/// of a BLAKE3 digest.
pub(crate) fn segment_id(symbol: &str, data: &[u8]) -> String {
    let mut h = blake3::Hasher::new();
    h.update(b"segment-id-v1");
    h.update(b"\0");
    h.update(symbol.as_bytes());
    h.update(b"\0");
    h.update(data);
    let hex = h.finalize().to_hex();
    format!("seg-{}", &hex[..32])
}

fn encode_batch(batch: &RecordBatch) -> StoreResult<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props)).context(EncodeSnafu)?;
    writer.write(batch).context(EncodeSnafu)?;
    let buf = writer.into_inner().context(EncodeSnafu)?;
    Ok(Bytes::from(buf))
}

/// Split `table` into chunks and encode each one.
///
/// Returns the segment references in row order together with the blobs to
/// store under their keys. An empty table produces no segments.
pub(crate) fn encode_segments(
    symbol: &str,
    table: &ColumnTable,
    rows_per_segment: usize,
) -> StoreResult<Vec<(SegmentRef, Bytes)>> {
    let batch = table.batch();
    let total = batch.num_rows();
    let chunk = rows_per_segment.max(1);

    let index = match table.index_ticks() {
        Some(res) => Some(res.map_err(|e| {
            StoreError::InvalidTable {
                reason: format!("index column is unreadable: {e}"),
            }
        })?),
        None => None,
    };

    let mut out = Vec::with_capacity(total.div_ceil(chunk));
    let mut offset = 0;
    while offset < total {
        let len = chunk.min(total - offset);
        let slice = batch.slice(offset, len);
        let bytes = encode_batch(&slice)?;
        let key = layout::segment_key(symbol, &segment_id(symbol, &bytes));

        // The index is sorted, so the chunk's bounds are its first and last rows.
        let (index_min, index_max) = match &index {
            Some(values) => (Some(values[offset]), Some(values[offset + len - 1])),
            None => (None, None),
        };

        out.push((
            SegmentRef {
                key,
                row_offset: offset as u64,
                row_count: len as u64,
                index_min,
                index_max,
            },
            bytes,
        ));
        offset += len;
    }
    Ok(out)
}

/// Decode a segment blob into a batch with exactly `schema`.
pub(crate) fn decode_segment(
    key: &str,
    data: Bytes,
    schema: &SchemaRef,
    expected_rows: u64,
) -> StoreResult<RecordBatch> {
    let corrupt = |detail: String| StorageCorruptionSnafu { key, detail }.build();

    let reader = ParquetRecordBatchReaderBuilder::try_new(data)
        .and_then(|builder| builder.build())
        .map_err(|e| corrupt(format!("unreadable parquet: {e}")))?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| corrupt(format!("unreadable row group: {e}")))?;
        // Re-attach the recorded schema; a column type mismatch is corruption.
        let batch = RecordBatch::try_new(schema.clone(), batch.columns().to_vec())
            .map_err(|e| corrupt(format!("schema mismatch: {e}")))?;
        batches.push(batch);
    }

    let batch = concat_batches(schema, &batches)
        .map_err(|e| corrupt(format!("cannot combine row groups: {e}")))?;
    ensure!(
        batch.num_rows() as u64 == expected_rows,
        StorageCorruptionSnafu {
            key,
            detail: format!(
                "segment has {} rows, version record expects {expected_rows}",
                batch.num_rows()
            ),
        }
    );
    Ok(batch)
}

/// Segments that may contain index ticks in `[start, end]` (inclusive).
///
/// Segments without index bounds are always kept.
pub(crate) fn segments_for_ticks(
    segments: &[SegmentRef],
    start: Option<i64>,
    end: Option<i64>,
) -> Vec<SegmentRef> {
    segments
        .iter()
        .filter(|seg| {
            let after_start = match (start, seg.index_max) {
                (Some(s), Some(max)) => max >= s,
                _ => true,
            };
            let before_end = match (end, seg.index_min) {
                (Some(e), Some(min)) => min <= e,
                _ => true,
            };
            after_start && before_end
        })
        .cloned()
        .collect()
}

/// Segments overlapping the half-open row range `rows`.
pub(crate) fn segments_for_rows(segments: &[SegmentRef], rows: &Range<u64>) -> Vec<SegmentRef> {
    segments
        .iter()
        .filter(|seg| {
            let r = seg.rows();
            r.start < rows.end && rows.start < r.end
        })
        .cloned()
        .collect()
}
