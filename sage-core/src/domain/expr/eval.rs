// sage-core/src/domain/expr/eval.rs
//
// Tree-walking evaluator. Deterministic, pure, side-effect free; the
// reference time comes from the context, never the wall clock.
// Division by zero yields a non-finite float that fails any inequality;
// an undeclared column is a hard error (the Validator renders it as a
// catalog-scope Finding, never as a silently-false predicate).

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::domain::error::DomainError;
use crate::domain::expr::ast::{BinaryOp, Expr, KeepPolicy, MethodCall, UnaryOp};
use crate::domain::expr::value::{map_cells, truthy, zip_cells, Value};
use crate::domain::table::{Scalar, Table};

pub struct EvalContext<'a> {
    /// The table of the scope being validated (field/row/catalog).
    pub current: Option<&'a Table>,
    /// All package tables by logical name (package scope only).
    pub tables: Option<&'a BTreeMap<String, Table>>,
    /// Reference time for now()/today().
    pub now: NaiveDateTime,
}

impl<'a> EvalContext<'a> {
    pub fn for_table(table: &'a Table, now: NaiveDateTime) -> Self {
        Self {
            current: Some(table),
            tables: None,
            now,
        }
    }

    pub fn for_package(tables: &'a BTreeMap<String, Table>, now: NaiveDateTime) -> Self {
        Self {
            current: None,
            tables: Some(tables),
            now,
        }
    }
}

/// Tolerant date parsing: the formats the corpus actually submits.
/// Returns None on failure — coerce semantics, the caller decides what
/// a NULL date means.
pub fn coerce_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn evaluate(expr: &Expr, ctx: &EvalContext) -> Result<Value, DomainError> {
    match expr {
        Expr::Number(n) => Ok(Value::Scalar(Scalar::Number(*n))),
        Expr::Str(s) => Ok(Value::Scalar(Scalar::Str(s.clone()))),
        Expr::Bool(b) => Ok(Value::Scalar(Scalar::Bool(*b))),
        Expr::Now => Ok(Value::Scalar(Scalar::Date(ctx.now))),

        Expr::List(_) => Err(DomainError::ExpressionEval(
            "a list literal is only valid as an isin() argument".into(),
        )),

        Expr::Column { table, column } => lookup_column(ctx, table.as_deref(), column),

        Expr::RowCount => {
            let table = ctx.current.ok_or_else(|| {
                DomainError::ExpressionEval("shape[0] is not available in this scope".into())
            })?;
            Ok(Value::Scalar(Scalar::Number(table.nrows() as f64)))
        }

        Expr::ToDatetime(inner) => {
            let value = evaluate(inner, ctx)?;
            map_cells(value, |cell| {
                Ok(match cell {
                    Scalar::Date(d) => Scalar::Date(*d),
                    Scalar::Str(s) => coerce_date(s).map(Scalar::Date).unwrap_or(Scalar::Null),
                    _ => Scalar::Null,
                })
            })
        }

        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => map_cells(value, |cell| match cell {
                    Scalar::Null => Ok(Scalar::Null),
                    Scalar::Bool(b) => Ok(Scalar::Bool(!b)),
                    other => Err(DomainError::ExpressionEval(format!(
                        "cannot negate non-boolean value '{}'",
                        other.render()
                    ))),
                }),
                UnaryOp::Neg => map_cells(value, |cell| match cell {
                    Scalar::Null => Ok(Scalar::Null),
                    other => other.as_number().map(|n| Scalar::Number(-n)).ok_or_else(|| {
                        DomainError::ExpressionEval(format!(
                            "cannot negate non-numeric value '{}'",
                            other.render()
                        ))
                    }),
                }),
            }
        }

        Expr::Binary { op, lhs, rhs } => {
            let left = evaluate(lhs, ctx)?;
            let right = evaluate(rhs, ctx)?;
            apply_binary(*op, left, right)
        }

        Expr::Method { receiver, call } => apply_method(receiver, call, ctx),
    }
}

fn lookup_column(
    ctx: &EvalContext,
    table: Option<&str>,
    column: &str,
) -> Result<Value, DomainError> {
    let resolved: &Table = match table {
        Some(logical_name) => ctx
            .tables
            .and_then(|tables| tables.get(logical_name))
            .ok_or_else(|| DomainError::UnknownTable {
                table: logical_name.to_string(),
            })?,
        None => ctx.current.ok_or_else(|| {
            DomainError::ExpressionEval(
                "bare column access is not available in package scope; use df['table']['col']"
                    .into(),
            )
        })?,
    };

    resolved
        .column(column)
        .map(|cells| Value::Series(cells.to_vec()))
        .ok_or_else(|| DomainError::UnknownColumn {
            column: column.to_string(),
        })
}

// =============================================================================
//  BINARY OPERATORS
// =============================================================================

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, DomainError> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            zip_cells(lhs, rhs, |a, b| arith(op, a, b))
        }
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            zip_cells(lhs, rhs, |a, b| Ok(compare(op, a, b)))
        }
        BinaryOp::And => zip_cells(lhs, rhs, |a, b| Ok(Scalar::Bool(truthy(a) && truthy(b)))),
        BinaryOp::Or => zip_cells(lhs, rhs, |a, b| Ok(Scalar::Bool(truthy(a) || truthy(b)))),
    }
}

fn arith(op: BinaryOp, a: &Scalar, b: &Scalar) -> Result<Scalar, DomainError> {
    if a.is_null() || b.is_null() {
        return Ok(Scalar::Null);
    }
    let (x, y) = match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(DomainError::ExpressionEval(format!(
                "arithmetic on non-numeric values '{}' and '{}'",
                a.render(),
                b.render()
            )))
        }
    };
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        // IEEE semantics: x/0 is ±inf (or NaN), which fails any inequality.
        BinaryOp::Div => x / y,
        _ => unreachable!("non-arithmetic op routed to arith"),
    };
    Ok(Scalar::Number(result))
}

/// NULL compares like pandas NaN: false against everything, except `!=`
/// which holds.
fn compare(op: BinaryOp, a: &Scalar, b: &Scalar) -> Scalar {
    if a.is_null() || b.is_null() {
        return Scalar::Bool(op == BinaryOp::Ne);
    }

    match op {
        BinaryOp::Eq => Scalar::Bool(a.same_value(b)),
        BinaryOp::Ne => Scalar::Bool(!a.same_value(b)),
        _ => {
            let ordering = partial_order(a, b);
            let holds = match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == std::cmp::Ordering::Less,
                (BinaryOp::Le, Some(o)) => o != std::cmp::Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == std::cmp::Ordering::Greater,
                (BinaryOp::Ge, Some(o)) => o != std::cmp::Ordering::Less,
                _ => unreachable!("non-ordering op routed to compare ordering"),
            };
            Scalar::Bool(holds)
        }
    }
}

fn partial_order(a: &Scalar, b: &Scalar) -> Option<std::cmp::Ordering> {
    // Dates first (a date column compared against to_datetime/now output)
    match (a, b) {
        (Scalar::Date(x), Scalar::Date(y)) => return x.partial_cmp(y),
        (Scalar::Date(x), Scalar::Str(s)) => return coerce_date(s).and_then(|y| x.partial_cmp(&y)),
        (Scalar::Str(s), Scalar::Date(y)) => return coerce_date(s).and_then(|x| x.partial_cmp(y)),
        _ => {}
    }
    // Numbers (with numeric-string coercion); NaN breaks every ordering
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x.partial_cmp(&y);
    }
    // Plain text
    match (a, b) {
        (Scalar::Str(x), Scalar::Str(y)) => x.partial_cmp(y),
        _ => None,
    }
}

// =============================================================================
//  METHODS
// =============================================================================

fn apply_method(
    receiver: &Expr,
    call: &MethodCall,
    ctx: &EvalContext,
) -> Result<Value, DomainError> {
    let value = evaluate(receiver, ctx)?;

    match call {
        MethodCall::NotNull => map_cells(value, |c| Ok(Scalar::Bool(!c.is_null()))),
        MethodCall::IsNull => map_cells(value, |c| Ok(Scalar::Bool(c.is_null()))),

        MethodCall::IsIn(arg) => {
            let members = isin_members(arg, ctx)?;
            map_cells(value, |cell| {
                if cell.is_null() {
                    return Ok(Scalar::Bool(false));
                }
                Ok(Scalar::Bool(members.iter().any(|m| cell.same_value(m))))
            })
        }

        MethodCall::Duplicated(policy) => {
            let cells = expect_series(value, "duplicated")?;
            Ok(Value::Series(mark_duplicates(&cells, *policy)))
        }

        MethodCall::StrContains(needle) => map_cells(value, |cell| {
            Ok(match cell {
                Scalar::Null => Scalar::Null,
                other => Scalar::Bool(other.render().contains(needle.as_str())),
            })
        }),

        MethodCall::StrMatch(pattern) => {
            // pandas str.match anchors at the start of the string
            let anchored = if pattern.starts_with('^') {
                pattern.clone()
            } else {
                format!("^{}", pattern)
            };
            let regex = Regex::new(&anchored).map_err(|e| {
                DomainError::ExpressionEval(format!("invalid regex '{}': {}", pattern, e))
            })?;
            map_cells(value, move |cell| {
                Ok(match cell {
                    Scalar::Null => Scalar::Null,
                    other => Scalar::Bool(regex.is_match(&other.render())),
                })
            })
        }

        MethodCall::StrLen => map_cells(value, |cell| {
            Ok(match cell {
                Scalar::Null => Scalar::Null,
                other => Scalar::Number(other.render().chars().count() as f64),
            })
        }),

        MethodCall::NUnique => {
            let cells = expect_series(value, "nunique")?;
            let mut seen = HashMap::new();
            for cell in cells.iter().filter(|c| !c.is_null()) {
                seen.entry(dedup_key(cell)).or_insert(());
            }
            Ok(Value::Scalar(Scalar::Number(seen.len() as f64)))
        }

        MethodCall::All => Ok(Value::Scalar(Scalar::Bool(value.into_scope_verdict()))),
        MethodCall::Any => {
            let any = match value {
                Value::Scalar(s) => truthy(&s),
                Value::Series(cells) => cells.iter().any(truthy),
            };
            Ok(Value::Scalar(Scalar::Bool(any)))
        }

        MethodCall::Min => aggregate_ordered(value, std::cmp::Ordering::Less),
        MethodCall::Max => aggregate_ordered(value, std::cmp::Ordering::Greater),

        MethodCall::Sum => {
            let cells = expect_series(value, "sum")?;
            let mut total = 0.0;
            for cell in cells.iter().filter(|c| !c.is_null()) {
                total += cell.as_number().ok_or_else(|| {
                    DomainError::ExpressionEval(format!(
                        "sum over non-numeric value '{}'",
                        cell.render()
                    ))
                })?;
            }
            Ok(Value::Scalar(Scalar::Number(total)))
        }

        MethodCall::Mean => {
            let cells = expect_series(value, "mean")?;
            let mut total = 0.0;
            let mut count = 0usize;
            for cell in cells.iter().filter(|c| !c.is_null()) {
                total += cell.as_number().ok_or_else(|| {
                    DomainError::ExpressionEval(format!(
                        "mean over non-numeric value '{}'",
                        cell.render()
                    ))
                })?;
                count += 1;
            }
            if count == 0 {
                return Ok(Value::Scalar(Scalar::Null));
            }
            Ok(Value::Scalar(Scalar::Number(total / count as f64)))
        }

        MethodCall::Abs => map_cells(value, |cell| match cell {
            Scalar::Null => Ok(Scalar::Null),
            other => other
                .as_number()
                .map(|n| Scalar::Number(n.abs()))
                .ok_or_else(|| {
                    DomainError::ExpressionEval(format!(
                        "abs over non-numeric value '{}'",
                        other.render()
                    ))
                }),
        }),
    }
}

fn isin_members(arg: &Expr, ctx: &EvalContext) -> Result<Vec<Scalar>, DomainError> {
    match arg {
        Expr::List(items) => {
            let mut members = Vec::with_capacity(items.len());
            for item in items {
                match evaluate(item, ctx)? {
                    Value::Scalar(s) => members.push(s),
                    Value::Series(_) => {
                        return Err(DomainError::ExpressionEval(
                            "isin list items must be scalar literals".into(),
                        ))
                    }
                }
            }
            Ok(members)
        }
        other => match evaluate(other, ctx)? {
            Value::Series(cells) => Ok(cells),
            Value::Scalar(s) => Ok(vec![s]),
        },
    }
}

fn expect_series(value: Value, method: &str) -> Result<Vec<Scalar>, DomainError> {
    match value {
        Value::Series(cells) => Ok(cells),
        Value::Scalar(_) => Err(DomainError::ExpressionEval(format!(
            "{} requires a column, not a scalar",
            method
        ))),
    }
}

/// Duplicate marking. NULLs are never duplicates of each other.
fn mark_duplicates(cells: &[Scalar], policy: KeepPolicy) -> Vec<Scalar> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for cell in cells.iter().filter(|c| !c.is_null()) {
        *counts.entry(dedup_key(cell)).or_insert(0) += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    cells
        .iter()
        .map(|cell| {
            if cell.is_null() {
                return Scalar::Bool(false);
            }
            let key = dedup_key(cell);
            let occurrence = seen.entry(key.clone()).or_insert(0);
            *occurrence += 1;
            let repeated = counts.get(&key).copied().unwrap_or(0) > 1;
            let marked = match policy {
                KeepPolicy::MarkAll => repeated,
                KeepPolicy::KeepFirst => repeated && *occurrence > 1,
            };
            Scalar::Bool(marked)
        })
        .collect()
}

/// Canonical hash key for duplicate/nunique bookkeeping ("2" and 2.0
/// collapse onto the same key, matching same_value()).
fn dedup_key(cell: &Scalar) -> String {
    match cell.as_number() {
        Some(n) => format!("n:{}", n),
        None => match cell {
            Scalar::Date(d) => format!("d:{}", d),
            other => format!("s:{}", other.render()),
        },
    }
}

fn aggregate_ordered(value: Value, keep: std::cmp::Ordering) -> Result<Value, DomainError> {
    let cells = expect_series(value, "min/max")?;
    let mut best: Option<Scalar> = None;
    for cell in cells.into_iter().filter(|c| !c.is_null()) {
        best = Some(match best {
            None => cell,
            Some(current) => {
                let ordering = partial_order(&cell, &current).ok_or_else(|| {
                    DomainError::ExpressionEval("min/max over incomparable values".into())
                })?;
                if ordering == keep {
                    cell
                } else {
                    current
                }
            }
        });
    }
    Ok(Value::Scalar(best.unwrap_or(Scalar::Null)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::expr::parse;

    fn table(columns: &[(&str, &[&str])]) -> Table {
        let headers: Vec<String> = columns.iter().map(|(name, _)| name.to_string()).collect();
        let nrows = columns.first().map(|(_, cells)| cells.len()).unwrap_or(0);
        let records: Vec<Vec<String>> = (0..nrows)
            .map(|row| columns.iter().map(|(_, cells)| cells[row].to_string()).collect())
            .collect();
        Table::from_records(headers, records).unwrap()
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn verdicts(expr: &str, t: &Table) -> Vec<bool> {
        let parsed = parse(expr).unwrap();
        let ctx = EvalContext::for_table(t, now());
        evaluate(&parsed, &ctx)
            .unwrap()
            .into_row_verdicts(t.nrows())
            .unwrap()
    }

    #[test]
    fn test_row_rule_total_equals_product() {
        let t = table(&[
            ("cantidad", &["2", "3"]),
            ("precio_unitario", &["10", "5"]),
            ("total", &["20", "16"]),
        ]);
        assert_eq!(
            verdicts("df['total'] == df['cantidad'] * df['precio_unitario']", &t),
            vec![true, false]
        );
    }

    #[test]
    fn test_division_by_zero_fails_inequalities() {
        let t = table(&[("a", &["10", "10"]), ("b", &["2", "0"])]);
        // 10/0 = inf: both < and >= 0.5 style checks must fail closed
        assert_eq!(verdicts("df['a'] / df['b'] < 100", &t), vec![true, false]);
    }

    #[test]
    fn test_duplicated_keep_false_marks_all() {
        let t = table(&[("codigo", &["A", "B", "A", ""])]);
        assert_eq!(
            verdicts("~df['codigo'].duplicated(keep=False)", &t),
            vec![false, true, false, true]
        );
    }

    #[test]
    fn test_duplicated_default_keeps_first() {
        let t = table(&[("codigo", &["A", "B", "A"])]);
        assert_eq!(
            verdicts("~df['codigo'].duplicated()", &t),
            vec![true, true, false]
        );
    }

    #[test]
    fn test_nulls_are_not_duplicates_of_each_other() {
        let t = table(&[("codigo", &["", "", "A"])]);
        assert_eq!(
            verdicts("~df['codigo'].duplicated(keep=False)", &t),
            vec![true, true, true]
        );
    }

    #[test]
    fn test_date_coerce_yields_null_then_notna_catches() {
        let t = table(&[("fecha", &["2024-01-15", "not-a-date"])]);
        assert_eq!(
            verdicts("to_datetime(df['fecha']).notna()", &t),
            vec![true, false]
        );
    }

    #[test]
    fn test_date_not_in_future() {
        let t = table(&[("fecha", &["2024-01-15", "2030-01-01"])]);
        assert_eq!(
            verdicts("to_datetime(df['fecha']) <= now()", &t),
            vec![true, false]
        );
    }

    #[test]
    fn test_isin_literal_is_case_sensitive() {
        let t = table(&[("estado", &["Activo", "activo"])]);
        assert_eq!(
            verdicts("df['estado'].isin(['Activo', 'Descontinuado'])", &t),
            vec![true, false]
        );
    }

    #[test]
    fn test_cross_table_isin() {
        let mut tables = BTreeMap::new();
        tables.insert(
            "ventas".to_string(),
            table(&[("customer_id", &["C1", "C2"])]),
        );
        tables.insert(
            "clientes".to_string(),
            table(&[("customer_id", &["C1"])]),
        );

        let expr =
            parse("df['ventas']['customer_id'].isin(df['clientes']['customer_id'])").unwrap();
        let ctx = EvalContext::for_package(&tables, now());
        let verdicts = evaluate(&expr, &ctx).unwrap().into_row_verdicts(2).unwrap();
        assert_eq!(verdicts, vec![true, false]);
    }

    #[test]
    fn test_unknown_column_is_hard_error() {
        let t = table(&[("a", &["1"])]);
        let expr = parse("df['missing'] > 0").unwrap();
        let ctx = EvalContext::for_table(&t, now());
        assert!(matches!(
            evaluate(&expr, &ctx),
            Err(DomainError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_null_comparison_is_false_but_ne_holds() {
        let t = table(&[("a", &["5", ""])]);
        assert_eq!(verdicts("df['a'] > 0", &t), vec![true, false]);
        assert_eq!(verdicts("df['a'] != 3", &t), vec![true, true]);
    }

    #[test]
    fn test_aggregates() {
        let t = table(&[("monto", &["10", "20", ""])]);
        assert_eq!(verdicts("df['monto'].sum() == 30", &t), vec![true; 3]);
        assert_eq!(verdicts("df['monto'].mean() == 15", &t), vec![true; 3]);
        assert_eq!(verdicts("df['monto'].nunique() == 2", &t), vec![true; 3]);
        assert_eq!(verdicts("df['monto'].max() == 20", &t), vec![true; 3]);
    }

    #[test]
    fn test_str_match_is_anchored() {
        let t = table(&[("codigo", &["PROD1234", "XPROD1234"])]);
        assert_eq!(
            verdicts(r"df['codigo'].str.match(r'PROD[0-9]{4}$')", &t),
            vec![true, false]
        );
    }

    #[test]
    fn test_discount_business_rule() {
        // ~((descuento / total > 0.50) & (cantidad < 100))
        let t = table(&[
            ("descuento", &["60", "60"]),
            ("total", &["100", "100"]),
            ("cantidad", &["50", "200"]),
        ]);
        assert_eq!(
            verdicts(
                "~((df['descuento'] / df['total'] > 0.50) & (df['cantidad'] < 100))",
                &t
            ),
            vec![false, true]
        );
    }

    #[test]
    fn test_empty_table_shape_check() {
        let t = table(&[("a", &[])]);
        let parsed = parse("df.shape[0] > 0").unwrap();
        let ctx = EvalContext::for_table(&t, now());
        assert!(!evaluate(&parsed, &ctx).unwrap().into_scope_verdict());
    }
}
