//! Column-wise evaluation of [`Expr`] trees.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, Scalar, StringArray},
    compute::{
        and_kleene, cast, is_not_null, is_null,
        kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq},
        not, or_kleene,
    },
    datatypes::DataType,
    record_batch::RecordBatch,
};
use snafu::prelude::*;

use super::{
    error::{ArrowSnafu, ColumnNotFoundSnafu, QueryResult, invalid},
    expr::{CompareOp, Expr, Literal, Operand},
};
use crate::table::{ColumnType, TimestampUnit};

/// Evaluate `expr` over `batch` into a row mask (null = unknown).
pub(crate) fn evaluate(expr: &Expr, batch: &RecordBatch) -> QueryResult<BooleanArray> {
    match expr {
        Expr::Compare { column, op, right } => compare(batch, column, *op, right),
        Expr::And(children) => combine(batch, children, |a, b| and_kleene(a, b)),
        Expr::Or(children) => combine(batch, children, |a, b| or_kleene(a, b)),
        Expr::Not(inner) => {
            let mask = evaluate(inner, batch)?;
            not(&mask).context(ArrowSnafu {
                context: "negating",
            })
        }
        Expr::IsNull(column) => {
            is_null(column_ref(batch, column)?.as_ref()).context(ArrowSnafu {
                context: "checking nulls",
            })
        }
        Expr::IsNotNull(column) => {
            is_not_null(column_ref(batch, column)?.as_ref()).context(ArrowSnafu {
                context: "checking nulls",
            })
        }
    }
}

fn combine<F>(batch: &RecordBatch, children: &[Expr], f: F) -> QueryResult<BooleanArray>
where
    F: Fn(&BooleanArray, &BooleanArray) -> Result<BooleanArray, arrow::error::ArrowError>,
{
    let mut iter = children.iter();
    let Some(first) = iter.next() else {
        return invalid("and/or needs at least one operand");
    };
    let mut acc = evaluate(first, batch)?;
    for child in iter {
        let mask = evaluate(child, batch)?;
        acc = f(&acc, &mask).context(ArrowSnafu {
            context: "combining predicates",
        })?;
    }
    Ok(acc)
}

pub(crate) fn column_ref<'a>(batch: &'a RecordBatch, name: &str) -> QueryResult<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .context(ColumnNotFoundSnafu { column: name })
}

fn is_numeric(t: &DataType) -> bool {
    matches!(t, DataType::Int64 | DataType::Float64)
}

fn to_f64(array: &ArrayRef) -> QueryResult<ArrayRef> {
    cast(array, &DataType::Float64).context(ArrowSnafu {
        context: "promoting to float",
    })
}

fn compare(
    batch: &RecordBatch,
    column: &str,
    op: CompareOp,
    right: &Operand,
) -> QueryResult<BooleanArray> {
    let left = column_ref(batch, column)?;
    let left_type = left.data_type();

    match right {
        Operand::Literal(Literal::Null) => Ok(BooleanArray::new_null(batch.num_rows())),
        Operand::Literal(lit) => {
            let (left, scalar) = literal_operands(left, column, lit)?;
            apply(op, &left, &Scalar::new(scalar))
        }
        Operand::Column(other) => {
            let right = column_ref(batch, other)?;
            let right_type = right.data_type();
            if left_type == right_type {
                apply(op, left, right)
            } else if is_numeric(left_type) && is_numeric(right_type) {
                apply(op, &to_f64(left)?, &to_f64(right)?)
            } else {
                invalid(format!(
                    "cannot compare column {column} ({left_type}) \
                     with column {other} ({right_type})"
                ))
            }
        }
    }
}

/// Coerce a literal (and, for int/float mixes, the column) to a common type.
fn literal_operands(
    left: &ArrayRef,
    column: &str,
    lit: &Literal,
) -> QueryResult<(ArrayRef, ArrayRef)> {
    let left_type = left.data_type();
    let scalar: ArrayRef = match (ColumnType::from_arrow(left_type), lit) {
        (Some(ColumnType::Integer), Literal::Int(v)) => Arc::new(Int64Array::from(vec![*v])),
        (Some(ColumnType::Integer), Literal::Float(v)) => {
            return Ok((to_f64(left)?, Arc::new(Float64Array::from(vec![*v]))));
        }
        (Some(ColumnType::Float), Literal::Float(v)) => Arc::new(Float64Array::from(vec![*v])),
        // i64 -> f64 may round for |v| > 2^53, matching float promotion.
        (Some(ColumnType::Float), Literal::Int(v)) => {
            Arc::new(Float64Array::from(vec![*v as f64]))
        }
        (Some(ColumnType::String), Literal::Str(v)) => {
            Arc::new(StringArray::from(vec![v.as_str()]))
        }
        (Some(ColumnType::Boolean), Literal::Bool(v)) => Arc::new(BooleanArray::from(vec![*v])),
        (Some(ColumnType::Timestamp { unit, .. }), Literal::Timestamp(ts)) => {
            timestamp_scalar(unit, *ts, left_type, column)?
        }
        _ => {
            return invalid(format!(
                "cannot compare column {column} ({left_type}) with literal {lit:?}"
            ));
        }
    };
    Ok((left.clone(), scalar))
}

fn timestamp_scalar(
    unit: TimestampUnit,
    ts: chrono::DateTime<chrono::Utc>,
    target: &DataType,
    column: &str,
) -> QueryResult<ArrayRef> {
    let Some(ticks) = unit.from_datetime(ts) else {
        return invalid(format!(
            "timestamp {ts} is out of range for column {column}"
        ));
    };
    let raw: ArrayRef = Arc::new(Int64Array::from(vec![ticks]));
    cast(&raw, target).context(ArrowSnafu {
        context: "converting timestamp literal",
    })
}

fn apply(
    op: CompareOp,
    left: &dyn arrow::array::Datum,
    right: &dyn arrow::array::Datum,
) -> QueryResult<BooleanArray> {
    let result = match op {
        CompareOp::Eq => eq(left, right),
        CompareOp::NotEq => neq(left, right),
        CompareOp::Lt => lt(left, right),
        CompareOp::LtEq => lt_eq(left, right),
        CompareOp::Gt => gt(left, right),
        CompareOp::GtEq => gt_eq(left, right),
    };
    result.context(ArrowSnafu {
        context: "comparing",
    })
}

/// Keep only rows whose mask is true.
pub(crate) fn apply_filter(batch: &RecordBatch, expr: &Expr) -> QueryResult<RecordBatch> {
    let mask = evaluate(expr, batch)?;
    arrow::compute::filter_record_batch(batch, &mask).context(ArrowSnafu {
        context: "filtering",
    })
}
