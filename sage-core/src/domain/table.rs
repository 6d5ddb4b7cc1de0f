// sage-core/src/domain/table.rs
//
// In-memory tabular data. Column-major so the expression engine can
// evaluate whole columns at once; rows are addressed 1-based in
// Findings (the header row does not count).

use chrono::NaiveDateTime;

use crate::domain::error::DomainError;

/// One cell. `Null` covers both an absent cell and a value the
/// per-field coercion could not interpret (pandas `NaN` semantics:
/// comparisons against Null are false, Null never equals Null).
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Date(NaiveDateTime),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view, parsing strings on the fly. Used by arithmetic and
    /// by the number-type field checks.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Str(s) => s.trim().parse::<f64>().ok(),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Display form used in Finding.observed_value.
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => "NULL".to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Scalar::Str(s) => s.clone(),
            Scalar::Date(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Equality for uniqueness/isin checks: exact, case-sensitive,
    /// Null equal to nothing (not even Null).
    pub fn same_value(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Null, _) | (_, Scalar::Null) => false,
            (Scalar::Number(a), Scalar::Number(b)) => a == b,
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Date(a), Scalar::Date(b)) => a == b,
            // Mixed numeric/text cells compare numerically when both sides parse
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

/// An ordered table: column names in file order, cells column-major.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    cells: Vec<Vec<Scalar>>,
    nrows: usize,
}

impl Table {
    /// Build from a header row and string records (the shape every file
    /// format decodes to). Empty strings become Null. Fails on
    /// duplicate headers; the caller turns that into a Finding.
    pub fn from_records(
        headers: Vec<String>,
        records: Vec<Vec<String>>,
    ) -> Result<Self, DomainError> {
        let mut seen = std::collections::HashSet::new();
        for h in &headers {
            if !seen.insert(h.as_str()) {
                return Err(DomainError::SchemaInvariant(format!(
                    "duplicate column header '{}'",
                    h
                )));
            }
        }

        let ncols = headers.len();
        let nrows = records.len();
        let mut cells: Vec<Vec<Scalar>> = vec![Vec::with_capacity(nrows); ncols];

        for record in records {
            for (i, col) in cells.iter_mut().enumerate() {
                let raw = record.get(i).map(|s| s.trim()).unwrap_or("");
                if raw.is_empty() {
                    col.push(Scalar::Null);
                } else {
                    col.push(Scalar::Str(raw.to_string()));
                }
            }
        }

        Ok(Self {
            columns: headers,
            cells,
            nrows,
        })
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Scalar]> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(&self.cells[idx])
    }

    /// Replace a column's cells in place. Used by the Validator's
    /// per-field type coercion (text stays text, number becomes
    /// Number, coercion failures keep the raw cell).
    pub fn replace_column(&mut self, name: &str, cells: Vec<Scalar>) -> Result<(), DomainError> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DomainError::UnknownColumn {
                column: name.to_string(),
            })?;
        if cells.len() != self.nrows {
            return Err(DomainError::SchemaInvariant(format!(
                "column '{}' length {} does not match table rows {}",
                name,
                cells.len(),
                self.nrows
            )));
        }
        self.cells[idx] = cells;
        Ok(())
    }

    /// One row as rendered strings, keyed by column, in column order.
    /// Used by the Sink when binding insert parameters.
    pub fn row(&self, index: usize) -> Vec<&Scalar> {
        self.cells.iter().map(|col| &col[index]).collect()
    }
}
