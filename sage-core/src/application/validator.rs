// sage-core/src/application/validator.rs
//
// Four stacked scopes, in order: field, row, catalog, package. A scope
// always runs to completion (partial diagnosis beats first-error
// abort); each downstream scope of the same catalog is short-circuited
// once an upstream scope has produced an ERROR, and every scope that
// actually had a check to run records its own INFO skip Finding.
// Emission order is the contract tests assert against: scope outer,
// declaration order inner, row order innermost.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::domain::diagnostic::{Diagnostic, Finding, FindingScope, Severity};
use crate::domain::expr::{self, eval, EvalContext};
use crate::domain::schema::{Catalog, FieldSpec, FieldType, Package, RuleCheck, Schema};
use crate::domain::table::{Scalar, Table};

pub struct Validator;

impl Validator {
    /// Validate every catalog of the package, then the cross rules.
    /// Reader findings already in `diagnostic` participate in the
    /// early-stop bookkeeping (a catalog that failed to decode skips
    /// its dependent cross rules).
    pub fn run(
        schema: &Schema,
        package: &Package,
        tables: &mut BTreeMap<String, Table>,
        now: NaiveDateTime,
        diagnostic: &mut Diagnostic,
    ) {
        for catalog_ref in &package.catalogs {
            let logical_name = &catalog_ref.logical_name;
            let catalog = schema.catalog(catalog_ref.catalog);

            let Some(table) = tables.get_mut(logical_name) else {
                // The Reader already explained the missing table.
                continue;
            };

            debug!(catalog = %logical_name, rows = table.nrows(), "validating catalog");

            field_scope(catalog, logical_name, table, now, diagnostic);

            // Each downstream scope is short-circuited on its own: an
            // INFO per skipped scope, and only when that scope had a
            // declared check to run.
            if diagnostic.has_errors_in_catalog(logical_name) {
                if catalog.row_validation.is_some() {
                    push_skip(
                        diagnostic,
                        logical_name,
                        "row checks skipped: field checks found errors",
                    );
                }
            } else {
                row_scope(catalog, logical_name, table, now, diagnostic);
            }

            if diagnostic.has_errors_in_catalog(logical_name) {
                if catalog.catalog_validation.is_some() {
                    push_skip(
                        diagnostic,
                        logical_name,
                        "catalog checks skipped: upstream checks found errors",
                    );
                }
            } else {
                catalog_scope(catalog, logical_name, table, now, diagnostic);
            }
        }

        package_scope(package, tables, now, diagnostic);
    }
}

fn push_skip(diagnostic: &mut Diagnostic, logical_name: &str, message: &str) {
    diagnostic.push(
        Finding::info(FindingScope::Catalog, message).in_catalog(logical_name.to_string()),
    );
}

// =============================================================================
//  FIELD SCOPE
// =============================================================================

fn field_scope(
    catalog: &Catalog,
    logical_name: &str,
    table: &mut Table,
    now: NaiveDateTime,
    diagnostic: &mut Diagnostic,
) {
    for field in &catalog.fields {
        if !table.has_column(&field.name) {
            diagnostic.push(
                Finding::error(
                    FindingScope::Field,
                    format!("field '{}' is missing from the input", field.name),
                )
                .in_catalog(logical_name.to_string())
                .at_field(field.name.clone()),
            );
            continue;
        }

        // 1. required
        if field.required {
            check_required(field, logical_name, table, diagnostic);
        }

        // 2. unique (NULLs are never duplicates of each other)
        if field.unique {
            check_unique(field, logical_name, table, diagnostic);
        }

        // 3-6. type checks, coercing parseable cells in place
        match field.field_type {
            FieldType::Text => check_text(field, logical_name, table, diagnostic),
            FieldType::Number => check_number(field, logical_name, table, diagnostic),
            FieldType::Date => check_date(field, logical_name, table, diagnostic),
            FieldType::Enum => check_enum(field, logical_name, table, diagnostic),
        }

        // 7. attached rules, in declaration order
        for rule in &field.validation_rules {
            run_vector_rule(
                &rule.validation_expression,
                rule.severity,
                rule.message.as_deref(),
                rule.name.as_deref(),
                Some(&field.name),
                FindingScope::Field,
                logical_name,
                table,
                now,
                diagnostic,
            );
        }
    }
}

fn cells<'a>(table: &'a Table, field: &FieldSpec) -> &'a [Scalar] {
    // Callers checked has_column; an empty slice only on logic errors.
    table.column(&field.name).unwrap_or(&[])
}

fn check_required(
    field: &FieldSpec,
    logical_name: &str,
    table: &Table,
    diagnostic: &mut Diagnostic,
) {
    let nulls: Vec<usize> = cells(table, field)
        .iter()
        .enumerate()
        .filter(|(_, cell)| cell.is_null())
        .map(|(i, _)| i + 1)
        .collect();

    for row in nulls {
        diagnostic.push(
            Finding::error(
                FindingScope::Field,
                format!("required field '{}' is null", field.name),
            )
            .in_catalog(logical_name.to_string())
            .at_field(field.name.clone())
            .at_row(row)
            .with_value("NULL"),
        );
    }
}

fn check_unique(field: &FieldSpec, logical_name: &str, table: &Table, diagnostic: &mut Diagnostic) {
    let column = cells(table, field);
    let mut seen: Vec<&Scalar> = Vec::new();

    for (index, cell) in column.iter().enumerate() {
        if cell.is_null() {
            continue;
        }
        if seen.iter().any(|prior| prior.same_value(cell)) {
            diagnostic.push(
                Finding::error(
                    FindingScope::Field,
                    format!("duplicate value in unique field '{}'", field.name),
                )
                .in_catalog(logical_name.to_string())
                .at_field(field.name.clone())
                .at_row(index + 1)
                .with_value(cell.render()),
            );
        } else {
            seen.push(cell);
        }
    }
}

fn check_text(field: &FieldSpec, logical_name: &str, table: &Table, diagnostic: &mut Diagnostic) {
    let Some(max_length) = field.length else { return };

    for (index, cell) in cells(table, field).iter().enumerate() {
        let length = match cell {
            Scalar::Null => continue,
            other => other.render().chars().count() as u32,
        };
        if length > max_length {
            diagnostic.push(
                Finding::warning(
                    FindingScope::Field,
                    format!(
                        "value in '{}' exceeds the maximum length of {}",
                        field.name, max_length
                    ),
                )
                .in_catalog(logical_name.to_string())
                .at_field(field.name.clone())
                .at_row(index + 1)
                .with_value(cell.render()),
            );
        }
    }
}

fn check_number(
    field: &FieldSpec,
    logical_name: &str,
    table: &mut Table,
    diagnostic: &mut Diagnostic,
) {
    let column = cells(table, field).to_vec();
    let mut coerced = Vec::with_capacity(column.len());

    for (index, cell) in column.iter().enumerate() {
        match cell {
            Scalar::Null => coerced.push(Scalar::Null),
            Scalar::Number(n) => coerced.push(Scalar::Number(*n)),
            other => {
                let raw = other.render();
                match raw.trim().parse::<f64>() {
                    Ok(parsed) => {
                        check_number_shape(field, logical_name, index, &raw, diagnostic);
                        coerced.push(Scalar::Number(parsed));
                    }
                    Err(_) => {
                        diagnostic.push(
                            Finding::error(
                                FindingScope::Field,
                                format!("value in '{}' is not a number", field.name),
                            )
                            .in_catalog(logical_name.to_string())
                            .at_field(field.name.clone())
                            .at_row(index + 1)
                            .with_value(raw.clone()),
                        );
                        coerced.push(other.clone());
                    }
                }
            }
        }
    }

    let _ = table.replace_column(&field.name, coerced);
}

/// Digit-count checks on the raw textual form: total digits against
/// `length`, fractional digits against `decimals`.
fn check_number_shape(
    field: &FieldSpec,
    logical_name: &str,
    index: usize,
    raw: &str,
    diagnostic: &mut Diagnostic,
) {
    let trimmed = raw.trim().trim_start_matches(['-', '+']);
    let digits = trimmed.chars().filter(char::is_ascii_digit).count() as u32;
    let fraction = trimmed
        .split_once('.')
        .map(|(_, f)| f.chars().filter(char::is_ascii_digit).count() as u32)
        .unwrap_or(0);

    if let Some(max_digits) = field.length {
        if digits > max_digits {
            diagnostic.push(
                Finding::warning(
                    FindingScope::Field,
                    format!(
                        "number in '{}' exceeds {} total digits",
                        field.name, max_digits
                    ),
                )
                .in_catalog(logical_name.to_string())
                .at_field(field.name.clone())
                .at_row(index + 1)
                .with_value(raw.to_string()),
            );
        }
    }

    if fraction > field.decimals_or_zero() {
        diagnostic.push(
            Finding::warning(
                FindingScope::Field,
                format!(
                    "number in '{}' has more than {} decimal places",
                    field.name,
                    field.decimals_or_zero()
                ),
            )
            .in_catalog(logical_name.to_string())
            .at_field(field.name.clone())
            .at_row(index + 1)
            .with_value(raw.to_string()),
        );
    }
}

fn check_date(
    field: &FieldSpec,
    logical_name: &str,
    table: &mut Table,
    diagnostic: &mut Diagnostic,
) {
    let column = cells(table, field).to_vec();
    let mut coerced = Vec::with_capacity(column.len());

    for (index, cell) in column.iter().enumerate() {
        match cell {
            Scalar::Null => coerced.push(Scalar::Null),
            Scalar::Date(d) => coerced.push(Scalar::Date(*d)),
            other => {
                let raw = other.render();
                match eval::coerce_date(&raw) {
                    Some(parsed) => coerced.push(Scalar::Date(parsed)),
                    None => {
                        diagnostic.push(
                            Finding::error(
                                FindingScope::Field,
                                format!("value in '{}' is not a valid date", field.name),
                            )
                            .in_catalog(logical_name.to_string())
                            .at_field(field.name.clone())
                            .at_row(index + 1)
                            .with_value(raw.clone()),
                        );
                        coerced.push(other.clone());
                    }
                }
            }
        }
    }

    let _ = table.replace_column(&field.name, coerced);
}

fn check_enum(field: &FieldSpec, logical_name: &str, table: &Table, diagnostic: &mut Diagnostic) {
    let Some(allowed) = &field.allowed_values else {
        return;
    };

    for (index, cell) in cells(table, field).iter().enumerate() {
        let raw = match cell {
            Scalar::Null => continue,
            other => other.render(),
        };
        // Exact match; "activo" is not "Activo".
        if !allowed.iter().any(|value| value == &raw) {
            diagnostic.push(
                Finding::error(
                    FindingScope::Field,
                    format!(
                        "value in '{}' is not one of the allowed values [{}]",
                        field.name,
                        allowed.join(", ")
                    ),
                )
                .in_catalog(logical_name.to_string())
                .at_field(field.name.clone())
                .at_row(index + 1)
                .with_value(raw),
            );
        }
    }
}

// =============================================================================
//  ROW / CATALOG SCOPES
// =============================================================================

fn row_scope(
    catalog: &Catalog,
    logical_name: &str,
    table: &Table,
    now: NaiveDateTime,
    diagnostic: &mut Diagnostic,
) {
    let Some(check) = &catalog.row_validation else {
        return;
    };
    run_vector_rule(
        &check.validation_expression,
        check.severity,
        check.message.as_deref(),
        check.description.as_deref(),
        None,
        FindingScope::Row,
        logical_name,
        table,
        now,
        diagnostic,
    );
}

fn catalog_scope(
    catalog: &Catalog,
    logical_name: &str,
    table: &Table,
    now: NaiveDateTime,
    diagnostic: &mut Diagnostic,
) {
    let Some(check) = &catalog.catalog_validation else {
        return;
    };

    match evaluate_on_table(&check.validation_expression, table, now) {
        Err(finding) => diagnostic.push(finding.in_catalog(logical_name.to_string())),
        Ok(value) => {
            if !value.into_scope_verdict() {
                diagnostic.push(
                    Finding::new(
                        check.severity,
                        FindingScope::Catalog,
                        rule_message(check, &check.validation_expression),
                    )
                    .in_catalog(logical_name.to_string())
                    .with_rule(check.validation_expression.clone()),
                );
            }
        }
    }
}

fn rule_message(check: &RuleCheck, expression: &str) -> String {
    check
        .message
        .clone()
        .unwrap_or_else(|| format!("validation failed: {}", expression))
}

// =============================================================================
//  PACKAGE SCOPE (cross rules)
// =============================================================================

fn package_scope(
    package: &Package,
    tables: &BTreeMap<String, Table>,
    now: NaiveDateTime,
    diagnostic: &mut Diagnostic,
) {
    for rule in &package.cross_rules {
        let parsed = match expr::parse(&rule.validation_expression) {
            Ok(parsed) => parsed,
            Err(e) => {
                diagnostic.push(
                    Finding::error(FindingScope::Package, e.to_string())
                        .with_rule(rule.name.clone()),
                );
                continue;
            }
        };

        let referenced = parsed.referenced_tables();

        // Prerequisite: every referenced catalog validated clean and
        // actually decoded. A failed prerequisite skips the rule.
        let unmet = referenced.iter().find(|name| {
            diagnostic.has_errors_in_catalog(name.as_str()) || !tables.contains_key(name.as_str())
        });
        if let Some(failed) = unmet {
            diagnostic.push(
                Finding::info(
                    FindingScope::Package,
                    format!(
                        "cross rule '{}' skipped: catalog '{}' did not validate",
                        rule.name, failed
                    ),
                )
                .with_rule(rule.name.clone()),
            );
            continue;
        }

        let ctx = EvalContext::for_package(tables, now);
        let value = match eval::evaluate(&parsed, &ctx) {
            Ok(value) => value,
            Err(e) => {
                diagnostic.push(
                    Finding::error(FindingScope::Package, e.to_string())
                        .with_rule(rule.name.clone()),
                );
                continue;
            }
        };

        let message = rule
            .message
            .clone()
            .unwrap_or_else(|| format!("cross rule '{}' failed", rule.name));

        // Vector verdicts index the rows of the first referenced table.
        let row_owner = referenced.first();
        match (value.is_series(), row_owner.and_then(|n| tables.get(n))) {
            (true, Some(owner_table)) => {
                let verdicts = match value.into_row_verdicts(owner_table.nrows()) {
                    Ok(verdicts) => verdicts,
                    Err(e) => {
                        diagnostic.push(
                            Finding::error(FindingScope::Package, e.to_string())
                                .with_rule(rule.name.clone()),
                        );
                        continue;
                    }
                };
                for (index, ok) in verdicts.iter().enumerate() {
                    if !ok {
                        let mut finding =
                            Finding::new(rule.severity, FindingScope::Package, message.clone())
                                .at_row(index + 1)
                                .with_rule(rule.name.clone());
                        if let Some(name) = row_owner {
                            finding = finding.in_catalog(name.clone());
                        }
                        diagnostic.push(finding);
                    }
                }
            }
            _ => {
                if !value.into_scope_verdict() {
                    let mut finding =
                        Finding::new(rule.severity, FindingScope::Package, message.clone())
                            .with_rule(rule.name.clone());
                    if let Some(name) = row_owner {
                        finding = finding.in_catalog(name.clone());
                    }
                    diagnostic.push(finding);
                }
            }
        }
    }
}

// =============================================================================
//  SHARED RULE PLUMBING
// =============================================================================

fn evaluate_on_table(
    expression: &str,
    table: &Table,
    now: NaiveDateTime,
) -> Result<expr::Value, Finding> {
    let parsed = expr::parse(expression)
        .map_err(|e| Finding::error(FindingScope::Catalog, e.to_string()))?;
    let ctx = EvalContext::for_table(table, now);
    eval::evaluate(&parsed, &ctx)
        .map_err(|e| Finding::error(FindingScope::Catalog, e.to_string()))
}

#[allow(clippy::too_many_arguments)]
fn run_vector_rule(
    expression: &str,
    severity: Severity,
    message: Option<&str>,
    rule_name: Option<&str>,
    field: Option<&str>,
    scope: FindingScope,
    logical_name: &str,
    table: &Table,
    now: NaiveDateTime,
    diagnostic: &mut Diagnostic,
) {
    let value = match evaluate_on_table(expression, table, now) {
        Ok(value) => value,
        Err(finding) => {
            // Evaluation errors land at catalog scope, never silently false.
            diagnostic.push(finding.in_catalog(logical_name.to_string()));
            return;
        }
    };

    let verdicts = match value.into_row_verdicts(table.nrows()) {
        Ok(verdicts) => verdicts,
        Err(e) => {
            diagnostic.push(
                Finding::error(FindingScope::Catalog, e.to_string())
                    .in_catalog(logical_name.to_string()),
            );
            return;
        }
    };

    let rendered_message =
        message.map(str::to_string).unwrap_or_else(|| format!("validation failed: {}", expression));

    for (index, ok) in verdicts.iter().enumerate() {
        if *ok {
            continue;
        }
        let mut finding = Finding::new(severity, scope, rendered_message.clone())
            .in_catalog(logical_name.to_string())
            .at_row(index + 1)
            .with_rule(rule_name.unwrap_or(expression).to_string());
        if let Some(field_name) = field {
            finding = finding.at_field(field_name.to_string());
            if let Some(cell) = table.column(field_name).and_then(|c| c.get(index)) {
                finding = finding.with_value(cell.render());
            }
        }
        diagnostic.push(finding);
    }
}

// =============================================================================
//  TESTS — the end-to-end scenarios the contract names
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn catalog(yaml: &str) -> Catalog {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn table(columns: &[(&str, &[&str])]) -> Table {
        let headers: Vec<String> = columns.iter().map(|(name, _)| name.to_string()).collect();
        let nrows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let records: Vec<Vec<String>> = (0..nrows)
            .map(|row| columns.iter().map(|(_, c)| c[row].to_string()).collect())
            .collect();
        Table::from_records(headers, records).unwrap()
    }

    /// Package with one catalog bound to the given table.
    fn run_single(
        catalog_yaml: &str,
        input: Table,
    ) -> Diagnostic {
        let mut schema = Schema::default();
        let handle = schema.push_catalog(catalog(catalog_yaml));
        let package = Package {
            name: "test".into(),
            description: None,
            mandatory: false,
            file_format: serde_yaml::from_str("type: CSV").unwrap(),
            catalogs: vec![crate::domain::schema::CatalogRef {
                logical_name: "datos".into(),
                file_inside_archive: None,
                catalog: handle,
                source: crate::domain::schema::RefSource::Inline,
                format_override: None,
            }],
            cross_rules: vec![],
            destination: None,
        };

        let mut tables = BTreeMap::new();
        tables.insert("datos".to_string(), input);
        let mut diagnostic = Diagnostic::new();
        Validator::run(&schema, &package, &mut tables, now(), &mut diagnostic);
        diagnostic
    }

    #[test]
    fn test_scenario_required_unique() {
        // codigo_producto required+unique over ["A","B","A",null]
        // => exactly two ERRORs: duplicate at row 3, null at row 4.
        let diagnostic = run_single(
            r#"
name: productos
fields:
  - name: codigo_producto
    type: text
    required: true
    unique: true
"#,
            table(&[("codigo_producto", &["A", "B", "A", ""])]),
        );

        let errors: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 2, "{:?}", diagnostic);

        // required runs before unique (spec's check order)
        assert_eq!(errors[0].locator.row, Some(4));
        assert!(errors[0].message.contains("required"));
        assert_eq!(errors[1].locator.row, Some(3));
        assert_eq!(errors[1].observed_value.as_deref(), Some("A"));
    }

    #[test]
    fn test_scenario_row_rule_total() {
        // total == cantidad * precio_unitario over [(2,10,20),(3,5,16)]
        // => one ERROR on row 2.
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: cantidad
    type: number
  - name: precio_unitario
    type: number
  - name: total
    type: number
row_validation:
  validation_expression: "df['total'] == df['cantidad'] * df['precio_unitario']"
  message: El total no coincide con cantidad x precio unitario
"#,
            table(&[
                ("cantidad", &["2", "3"]),
                ("precio_unitario", &["10", "5"]),
                ("total", &["20", "16"]),
            ]),
        );

        let errors: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1, "{:?}", diagnostic);
        assert_eq!(errors[0].locator.row, Some(2));
        assert_eq!(errors[0].scope, FindingScope::Row);
    }

    #[test]
    fn test_scenario_cross_rule_isin() {
        // ventas.customer_id = [C1, C2], clientes.customer_id = {C1}
        // => one ERROR at row 2 of ventas.
        let mut schema = Schema::default();
        let ventas = schema.push_catalog(catalog(
            "name: ventas\nfields:\n  - name: customer_id\n    type: text\n",
        ));
        let clientes = schema.push_catalog(catalog(
            "name: clientes\nfields:\n  - name: customer_id\n    type: text\n",
        ));

        let package = Package {
            name: "ventas_y_clientes".into(),
            description: None,
            mandatory: false,
            file_format: serde_yaml::from_str("type: ZIP").unwrap(),
            catalogs: vec![
                crate::domain::schema::CatalogRef {
                    logical_name: "ventas".into(),
                    file_inside_archive: None,
                    catalog: ventas,
                    source: crate::domain::schema::RefSource::Inline,
                    format_override: None,
                },
                crate::domain::schema::CatalogRef {
                    logical_name: "clientes".into(),
                    file_inside_archive: None,
                    catalog: clientes,
                    source: crate::domain::schema::RefSource::Inline,
                    format_override: None,
                },
            ],
            cross_rules: vec![serde_yaml::from_str(
                r#"
name: clientes_existentes
validation_expression: "df['ventas']['customer_id'].isin(df['clientes']['customer_id'])"
message: Venta con cliente inexistente
"#,
            )
            .unwrap()],
            destination: None,
        };

        let mut tables = BTreeMap::new();
        tables.insert("ventas".into(), table(&[("customer_id", &["C1", "C2"])]));
        tables.insert("clientes".into(), table(&[("customer_id", &["C1"])]));

        let mut diagnostic = Diagnostic::new();
        Validator::run(&schema, &package, &mut tables, now(), &mut diagnostic);

        let errors: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1, "{:?}", diagnostic);
        assert_eq!(errors[0].scope, FindingScope::Package);
        assert_eq!(errors[0].locator.row, Some(2));
        assert_eq!(errors[0].locator.catalog.as_deref(), Some("ventas"));
    }

    #[test]
    fn test_cross_rule_skipped_when_prerequisite_failed() {
        let mut schema = Schema::default();
        let ventas = schema.push_catalog(catalog(
            "name: ventas\nfields:\n  - name: customer_id\n    type: text\n    required: true\n",
        ));
        let clientes = schema.push_catalog(catalog(
            "name: clientes\nfields:\n  - name: customer_id\n    type: text\n",
        ));

        let package = Package {
            name: "p".into(),
            description: None,
            mandatory: false,
            file_format: serde_yaml::from_str("type: ZIP").unwrap(),
            catalogs: vec![
                crate::domain::schema::CatalogRef {
                    logical_name: "ventas".into(),
                    file_inside_archive: None,
                    catalog: ventas,
                    source: crate::domain::schema::RefSource::Inline,
                    format_override: None,
                },
                crate::domain::schema::CatalogRef {
                    logical_name: "clientes".into(),
                    file_inside_archive: None,
                    catalog: clientes,
                    source: crate::domain::schema::RefSource::Inline,
                    format_override: None,
                },
            ],
            cross_rules: vec![serde_yaml::from_str(
                r#"
name: clientes_existentes
validation_expression: "df['ventas']['customer_id'].isin(df['clientes']['customer_id'])"
"#,
            )
            .unwrap()],
            destination: None,
        };

        let mut tables = BTreeMap::new();
        // null customer_id: ventas fails its field scope
        tables.insert("ventas".into(), table(&[("customer_id", &["C1", ""])]));
        tables.insert("clientes".into(), table(&[("customer_id", &["C1"])]));

        let mut diagnostic = Diagnostic::new();
        Validator::run(&schema, &package, &mut tables, now(), &mut diagnostic);

        let skip: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Info && f.scope == FindingScope::Package)
            .collect();
        assert_eq!(skip.len(), 1, "{:?}", diagnostic);
        assert!(skip[0].message.contains("skipped"));
    }

    #[test]
    fn test_empty_table_catalog_validation_errors_without_crash() {
        let diagnostic = run_single(
            r#"
name: datos
fields:
  - name: a
    type: text
catalog_validation:
  validation_expression: "df.shape[0] > 0"
  message: La tabla no puede estar vacia
"#,
            table(&[("a", &[])]),
        );

        assert!(diagnostic.has_errors());
        let finding = diagnostic
            .findings
            .iter()
            .find(|f| f.scope == FindingScope::Catalog)
            .unwrap();
        assert_eq!(finding.message, "La tabla no puede estar vacia");
    }

    #[test]
    fn test_enum_is_case_sensitive() {
        let diagnostic = run_single(
            r#"
name: productos
fields:
  - name: estado
    type: enum
    allowed_values: [Activo, Descontinuado]
"#,
            table(&[("estado", &["Activo", "activo"])]),
        );

        let errors: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].locator.row, Some(2));
        assert_eq!(errors[0].observed_value.as_deref(), Some("activo"));
    }

    #[test]
    fn test_number_decimals_warning_and_parse_error() {
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: precio
    type: number
    decimals: 2
"#,
            table(&[("precio", &["10.123", "abc", "5.25"])]),
        );

        let warnings: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect();
        let errors: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].locator.row, Some(1));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].locator.row, Some(2));
    }

    #[test]
    fn test_field_error_skips_row_scope_with_info() {
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: total
    type: number
    required: true
row_validation:
  validation_expression: "df['total'] > 0"
"#,
            table(&[("total", &[""])]),
        );

        // required error, then a single INFO recording the row skip —
        // there is no catalog_validation, so nothing else was skipped
        assert!(diagnostic.has_errors());
        let info: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Info)
            .collect();
        assert_eq!(info.len(), 1);
        assert!(info[0].message.contains("row checks skipped"));
        assert!(!info[0].message.contains("catalog"));
        // and no row-scope finding was produced
        assert!(!diagnostic
            .findings
            .iter()
            .any(|f| f.scope == FindingScope::Row));
    }

    #[test]
    fn test_field_error_skips_each_downstream_scope_separately() {
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: total
    type: number
    required: true
row_validation:
  validation_expression: "df['total'] > 0"
catalog_validation:
  validation_expression: "df.shape[0] > 0"
"#,
            table(&[("total", &[""])]),
        );

        // one INFO per short-circuited scope, in scope order
        let info: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Info)
            .collect();
        assert_eq!(info.len(), 2, "{:?}", diagnostic);
        assert!(info[0].message.contains("row checks skipped"));
        assert!(info[1].message.contains("catalog checks skipped"));
        assert!(!diagnostic
            .findings
            .iter()
            .any(|f| matches!(f.scope, FindingScope::Row | FindingScope::Catalog)
                && f.severity != Severity::Info));
    }

    #[test]
    fn test_field_error_with_no_downstream_checks_emits_no_skip() {
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: total
    type: number
    required: true
"#,
            table(&[("total", &[""])]),
        );

        assert!(diagnostic.has_errors());
        assert!(!diagnostic
            .findings
            .iter()
            .any(|f| f.severity == Severity::Info));
    }

    #[test]
    fn test_row_error_skips_catalog_scope_with_info() {
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: total
    type: number
row_validation:
  validation_expression: "df['total'] > 0"
catalog_validation:
  validation_expression: "df.shape[0] > 0"
"#,
            table(&[("total", &["-1"])]),
        );

        // the row rule fails; only catalog scope is short-circuited
        assert!(diagnostic
            .findings
            .iter()
            .any(|f| f.scope == FindingScope::Row && f.severity == Severity::Error));
        let info: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Info)
            .collect();
        assert_eq!(info.len(), 1);
        assert!(info[0].message.contains("catalog checks skipped"));
    }

    #[test]
    fn test_undeclared_column_in_rule_is_catalog_error() {
        let diagnostic = run_single(
            r#"
name: datos
fields:
  - name: a
    type: text
    validation_rules:
      - validation_expression: "df['no_existe'] > 0"
"#,
            table(&[("a", &["x"])]),
        );

        let finding = diagnostic
            .findings
            .iter()
            .find(|f| f.scope == FindingScope::Catalog)
            .unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("no_existe"));
    }

    #[test]
    fn test_date_coercion_catches_bad_dates() {
        let diagnostic = run_single(
            r#"
name: ventas
fields:
  - name: fecha_venta
    type: date
"#,
            table(&[("fecha_venta", &["2024-05-01", "31/12/2023", "ayer"])]),
        );

        let errors: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].locator.row, Some(3));
        assert_eq!(errors[0].observed_value.as_deref(), Some("ayer"));
    }

    #[test]
    fn test_field_rule_carries_severity_and_value() {
        let diagnostic = run_single(
            r#"
name: productos
fields:
  - name: precio_lista
    type: number
    validation_rules:
      - name: precio_positivo
        validation_expression: "df['precio_lista'] > 0"
        message: El precio debe ser positivo
        severity: WARNING
"#,
            table(&[("precio_lista", &["10", "-3"])]),
        );

        let warnings: Vec<&Finding> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].locator.row, Some(2));
        assert_eq!(warnings[0].observed_value.as_deref(), Some("-3"));
        assert_eq!(warnings[0].rule_name.as_deref(), Some("precio_positivo"));
        assert_eq!(warnings[0].message, "El precio debe ser positivo");
    }
}
