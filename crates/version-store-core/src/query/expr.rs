//! Filter predicate trees.
//!
//! An [`Expr`] is a serializable tree of comparisons, boolean combinators and
//! null checks. It is evaluated column-wise against a record batch into a
//! boolean mask using three-valued logic; rows whose predicate is null are
//! dropped, like rows whose predicate is false.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A constant operand in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    /// SQL-style null; every comparison against it is unknown.
    Null,
    /// Boolean constant.
    Bool(bool),
    /// Integer constant.
    Int(i64),
    /// Floating point constant.
    Float(f64),
    /// String constant.
    Str(String),
    /// Instant, converted to the compared column's unit and timezone.
    Timestamp(DateTime<Utc>),
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Str(v)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(v: DateTime<Utc>) -> Self {
        Literal::Timestamp(v)
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Another column of the same table.
    Column(String),
    /// A constant.
    Literal(Literal),
}

impl From<Literal> for Operand {
    fn from(v: Literal) -> Self {
        Operand::Literal(v)
    }
}

macro_rules! literal_operand {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Operand {
                fn from(v: $t) -> Self {
                    Operand::Literal(Literal::from(v))
                }
            }
        )*
    };
}

literal_operand!(bool, i64, f64, &str, String, DateTime<Utc>);

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

/// A boolean predicate over the rows of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// `column <op> right`
    Compare {
        /// Left-hand column.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand column or constant.
        right: Operand,
    },
    /// Conjunction of one or more predicates.
    And(Vec<Expr>),
    /// Disjunction of one or more predicates.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// True where the column is null.
    IsNull(String),
    /// True where the column is not null.
    IsNotNull(String),
}

impl Expr {
    /// `column <op> right`
    pub fn compare(column: impl Into<String>, op: CompareOp, right: impl Into<Operand>) -> Self {
        Expr::Compare {
            column: column.into(),
            op,
            right: right.into(),
        }
    }

    /// `left <op> right` between two columns.
    pub fn compare_columns(
        left: impl Into<String>,
        op: CompareOp,
        right: impl Into<String>,
    ) -> Self {
        Expr::Compare {
            column: left.into(),
            op,
            right: Operand::Column(right.into()),
        }
    }

    /// Conjunction of `exprs`.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::And(exprs.into_iter().collect())
    }

    /// Disjunction of `exprs`.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Negation of `expr`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// True where `column` is null.
    pub fn is_null(column: impl Into<String>) -> Self {
        Expr::IsNull(column.into())
    }

    /// True where `column` is not null.
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Expr::IsNotNull(column.into())
    }

    /// Structural problems that make the tree unevaluable regardless of the
    /// table: empty combinators, empty column names and non-finite floats.
    pub(crate) fn structural_error(&self) -> Option<String> {
        match self {
            Expr::Compare { column, right, .. } => {
                if column.is_empty() {
                    return Some("comparison has an empty column name".to_string());
                }
                match right {
                    Operand::Column(c) if c.is_empty() => {
                        Some("comparison has an empty right-hand column name".to_string())
                    }
                    // JSON cannot encode these, so the tree would not round-trip.
                    Operand::Literal(Literal::Float(v)) if !v.is_finite() => {
                        Some(format!(
                            "comparison against {column} uses non-finite literal {v}"
                        ))
                    }
                    _ => None,
                }
            }
            Expr::And(children) | Expr::Or(children) => {
                if children.is_empty() {
                    return Some("and/or needs at least one operand".to_string());
                }
                children.iter().find_map(Expr::structural_error)
            }
            Expr::Not(inner) => inner.structural_error(),
            Expr::IsNull(c) | Expr::IsNotNull(c) if c.is_empty() => {
                Some("null check has an empty column name".to_string())
            }
            Expr::IsNull(_) | Expr::IsNotNull(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_expected_tree() {
        let expr = Expr::and([
            Expr::compare("px", CompareOp::Gt, 1.5),
            Expr::not(Expr::is_null("sym")),
        ]);
        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::Compare {
                    column: "px".to_string(),
                    op: CompareOp::Gt,
                    right: Operand::Literal(Literal::Float(1.5)),
                },
                Expr::Not(Box::new(Expr::IsNull("sym".to_string()))),
            ])
        );
    }

    #[test]
    fn wire_form_is_stable() {
        let expr = Expr::compare("x", CompareOp::LtEq, 3i64);
        let json = serde_json::to_value(&expr).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "compare": {
                    "column": "x",
                    "op": "lt_eq",
                    "right": { "literal": { "type": "int", "value": 3 } }
                }
            })
        );
    }

    #[test]
    fn structural_errors_are_found_in_nested_nodes() {
        assert!(Expr::is_null("a").structural_error().is_none());
        assert!(Expr::and([]).structural_error().is_some());
        assert!(
            Expr::not(Expr::or([Expr::is_not_null("")]))
                .structural_error()
                .is_some()
        );
    }

    #[test]
    fn non_finite_float_literals_are_structural_errors() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let expr = Expr::or([Expr::is_null("a"), Expr::compare("px", CompareOp::Lt, v)]);
            assert!(expr.structural_error().is_some(), "{v}");
        }
        let finite = Expr::compare("px", CompareOp::Lt, f64::MAX);
        assert!(finite.structural_error().is_none());
    }
}
