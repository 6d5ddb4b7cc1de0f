// sage-core/src/domain/expr/value.rs

use crate::domain::error::DomainError;
use crate::domain::table::Scalar;

/// What an expression evaluates to: one verdict for the whole scope, or
/// one per input row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Series(Vec<Scalar>),
}

/// pandas-flavored truthiness. Null is falsy so that a NULL verdict
/// fails validation instead of passing silently.
pub fn truthy(scalar: &Scalar) -> bool {
    match scalar {
        Scalar::Null => false,
        Scalar::Bool(b) => *b,
        Scalar::Number(n) => *n != 0.0 && !n.is_nan(),
        Scalar::Str(s) => !s.is_empty(),
        Scalar::Date(_) => true,
    }
}

impl Value {
    /// Per-row verdicts for a scope of `nrows` rows. A scalar result is
    /// broadcast; a series must match the row count.
    pub fn into_row_verdicts(self, nrows: usize) -> Result<Vec<bool>, DomainError> {
        match self {
            Value::Scalar(s) => Ok(vec![truthy(&s); nrows]),
            Value::Series(cells) => {
                if cells.len() != nrows {
                    return Err(DomainError::ExpressionEval(format!(
                        "vector length {} does not match row count {}",
                        cells.len(),
                        nrows
                    )));
                }
                Ok(cells.iter().map(truthy).collect())
            }
        }
    }

    /// Whole-scope verdict. A series is reduced with all() — this is
    /// the vector-where-scalar-required rule.
    pub fn into_scope_verdict(self) -> bool {
        match self {
            Value::Scalar(s) => truthy(&s),
            Value::Series(cells) => cells.iter().all(truthy),
        }
    }

    pub fn is_series(&self) -> bool {
        matches!(self, Value::Series(_))
    }
}

/// Apply a cell-wise operation over two values, broadcasting scalars.
pub fn zip_cells<F>(lhs: Value, rhs: Value, f: F) -> Result<Value, DomainError>
where
    F: Fn(&Scalar, &Scalar) -> Result<Scalar, DomainError>,
{
    match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(&a, &b)?)),
        (Value::Series(a), Value::Scalar(b)) => Ok(Value::Series(
            a.iter().map(|x| f(x, &b)).collect::<Result<_, _>>()?,
        )),
        (Value::Scalar(a), Value::Series(b)) => Ok(Value::Series(
            b.iter().map(|x| f(&a, x)).collect::<Result<_, _>>()?,
        )),
        (Value::Series(a), Value::Series(b)) => {
            if a.len() != b.len() {
                return Err(DomainError::ExpressionEval(format!(
                    "series length mismatch: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            Ok(Value::Series(
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| f(x, y))
                    .collect::<Result<_, _>>()?,
            ))
        }
    }
}

/// Apply a cell-wise operation over one value.
pub fn map_cells<F>(value: Value, f: F) -> Result<Value, DomainError>
where
    F: Fn(&Scalar) -> Result<Scalar, DomainError>,
{
    match value {
        Value::Scalar(s) => Ok(Value::Scalar(f(&s)?)),
        Value::Series(cells) => Ok(Value::Series(
            cells.iter().map(f).collect::<Result<_, _>>()?,
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_broadcasts_over_rows() {
        let verdicts = Value::Scalar(Scalar::Bool(true))
            .into_row_verdicts(3)
            .unwrap();
        assert_eq!(verdicts, vec![true, true, true]);
    }

    #[test]
    fn test_series_reduced_with_all() {
        let value = Value::Series(vec![Scalar::Bool(true), Scalar::Bool(false)]);
        assert!(!value.into_scope_verdict());

        let value = Value::Series(vec![Scalar::Bool(true), Scalar::Bool(true)]);
        assert!(value.into_scope_verdict());
    }

    #[test]
    fn test_null_is_falsy() {
        assert!(!truthy(&Scalar::Null));
        let verdicts = Value::Series(vec![Scalar::Null, Scalar::Bool(true)])
            .into_row_verdicts(2)
            .unwrap();
        assert_eq!(verdicts, vec![false, true]);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let value = Value::Series(vec![Scalar::Bool(true)]);
        assert!(value.into_row_verdicts(2).is_err());
    }
}
