// sage-core/src/application/sink.rs
//
// Applies a validated package to its Destination: one transaction for
// the whole package, commit iff every operation and the optional
// pre-validation hook succeed. Any failure rolls back and becomes an
// ERROR Finding with scope=catalog.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::domain::diagnostic::{Diagnostic, Finding, FindingScope};
use crate::domain::schema::{InsertionMethod, Package, Schema};
use crate::domain::submission::Submission;
use crate::domain::table::{Scalar, Table};
use crate::ports::connector::{SinkConnector, SinkTransaction};
use crate::ports::hook::PreValidationHook;

/// Longest pre-validation response body carried into a Finding.
const HOOK_BODY_LIMIT: usize = 300;

pub struct Sink;

impl Sink {
    /// Precondition (enforced by the Run Controller): the Diagnostic is
    /// clean and the Destination is enabled.
    pub async fn apply(
        schema: &Schema,
        package: &Package,
        tables: &BTreeMap<String, Table>,
        submission: &Submission,
        connector: &dyn SinkConnector,
        hook: Option<&dyn PreValidationHook>,
    ) -> Diagnostic {
        let mut diagnostic = Diagnostic::new();

        let Some(destination) = &package.destination else {
            return diagnostic;
        };

        let mut tx = match connector.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                diagnostic.push(Finding::error(
                    FindingScope::Catalog,
                    format!("cannot open sink transaction: {}", e),
                ));
                return diagnostic;
            }
        };

        match apply_in_transaction(schema, package, tables, submission, tx.as_mut(), hook).await {
            Ok(applied_rows) => {
                if let Err(e) = tx.commit().await {
                    diagnostic.push(Finding::error(
                        FindingScope::Catalog,
                        format!("commit failed: {}", e),
                    ));
                    return diagnostic;
                }
                info!(
                    package = %package.name,
                    rows = applied_rows,
                    driver = connector.driver_name(),
                    method = ?destination.insertion_method,
                    "sink committed"
                );
            }
            Err(finding) => {
                warn!(package = %package.name, "sink rolled back: {}", finding.message);
                if let Err(e) = tx.rollback().await {
                    diagnostic.push(Finding::error(
                        FindingScope::Catalog,
                        format!("rollback failed: {}", e),
                    ));
                }
                diagnostic.push(*finding);
            }
        }

        diagnostic
    }
}

async fn apply_in_transaction(
    schema: &Schema,
    package: &Package,
    tables: &BTreeMap<String, Table>,
    submission: &Submission,
    tx: &mut dyn SinkTransaction,
    hook: Option<&dyn PreValidationHook>,
) -> Result<u64, Box<Finding>> {
    // Precondition checked by the caller; destructure defensively.
    let destination = package
        .destination
        .as_ref()
        .ok_or_else(|| sink_error(None, "package has no destination"))?;

    let staging_base = format!("stage_{}", submission.submission_id);

    // 1. Stage + hook: the scratch copy exists before the check runs.
    if let (Some(config), Some(hook)) = (&destination.pre_validation, hook) {
        for catalog_ref in &package.catalogs {
            let Some(table) = tables.get(&catalog_ref.logical_name) else {
                continue;
            };
            let staging_table = format!("{}_{}", staging_base, catalog_ref.logical_name);
            let columns = table.column_names().to_vec();

            tx.create_staging(&staging_table, &columns)
                .await
                .map_err(|e| sink_error(Some(&catalog_ref.logical_name), &e.to_string()))?;
            tx.insert(&staging_table, &columns, &materialize_rows(table))
                .await
                .map_err(|e| sink_error(Some(&catalog_ref.logical_name), &e.to_string()))?;
        }

        let response = hook
            .call(config, &staging_base, &submission.submission_id)
            .await
            .map_err(|e| sink_error(None, &format!("pre_validation call failed: {}", e)))?;

        if !response.is_success() {
            let mut body = response.body;
            body.truncate(HOOK_BODY_LIMIT);
            return Err(sink_error(
                None,
                &format!(
                    "pre_validation returned HTTP {}: {}",
                    response.status, body
                ),
            ));
        }
        debug!(status = response.status, "pre_validation passed");
    }

    // 2. Apply the declared insertion semantics, catalog by catalog.
    let mut applied_rows = 0u64;
    for catalog_ref in &package.catalogs {
        let logical_name = &catalog_ref.logical_name;
        let Some(table) = tables.get(logical_name) else {
            continue;
        };

        let catalog = schema.catalog(catalog_ref.catalog);
        let target = target_table(package, logical_name, &destination.target_table);
        let columns = table.column_names().to_vec();
        let rows = materialize_rows(table);

        let result = match destination.insertion_method {
            InsertionMethod::Insert => tx.insert(&target, &columns, &rows).await,
            InsertionMethod::Upsert => {
                let conflict_keys: Vec<String> = catalog
                    .fields
                    .iter()
                    .filter(|f| f.unique)
                    .map(|f| f.name.clone())
                    .collect();
                tx.upsert(&target, &columns, &conflict_keys, &rows).await
            }
            InsertionMethod::Replace => {
                // Delete and insert share this transaction.
                match tx.delete_all(&target).await {
                    Ok(_) => tx.insert(&target, &columns, &rows).await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(n) => applied_rows += n,
            Err(e) => return Err(sink_error(Some(logical_name), &e.to_string())),
        }
    }

    Ok(applied_rows)
}

/// A single-catalog package lands in target_table; additional catalogs
/// get a suffixed table each.
fn target_table(package: &Package, logical_name: &str, base: &str) -> String {
    if package.catalogs.len() == 1 {
        base.to_string()
    } else {
        format!("{}_{}", base, logical_name)
    }
}

fn materialize_rows(table: &Table) -> Vec<Vec<Scalar>> {
    (0..table.nrows())
        .map(|i| table.row(i).into_iter().cloned().collect())
        .collect()
}

fn sink_error(logical_name: Option<&str>, message: &str) -> Box<Finding> {
    let mut finding = Finding::error(FindingScope::Catalog, message.to_string());
    if let Some(name) = logical_name {
        finding = finding.in_catalog(name.to_string());
    }
    Box::new(finding)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::schema::{CatalogRef, Destination, RefSource};
    use crate::infrastructure::adapters::memory::MemoryConnector;
    use crate::ports::hook::HookResponse;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU16, Ordering};

    struct StubHook {
        status: AtomicU16,
        body: String,
    }

    impl StubHook {
        fn returning(status: u16, body: &str) -> Self {
            Self {
                status: AtomicU16::new(status),
                body: body.to_string(),
            }
        }
    }

    #[async_trait]
    impl PreValidationHook for StubHook {
        async fn call(
            &self,
            _config: &crate::domain::schema::PreValidation,
            _staging_table: &str,
            _submission_id: &str,
        ) -> Result<HookResponse, crate::error::SageError> {
            Ok(HookResponse {
                status: self.status.load(Ordering::SeqCst),
                body: self.body.clone(),
            })
        }
    }

    fn fixture(
        insertion_method: InsertionMethod,
        pre_validation: bool,
    ) -> (Schema, Package, BTreeMap<String, Table>, Submission) {
        let mut schema = Schema::default();
        let handle = schema.push_catalog(
            serde_yaml::from_str(
                r#"
name: productos
fields:
  - name: codigo
    type: text
    unique: true
  - name: precio
    type: number
"#,
            )
            .unwrap(),
        );

        let destination: Destination = serde_yaml::from_str(&format!(
            r#"
enabled: true
target_table: productos
insertion_method: {}
connection:
  driver: postgresql
  host: db
  database: sage
{}"#,
            match insertion_method {
                InsertionMethod::Insert => "insert",
                InsertionMethod::Upsert => "upsert",
                InsertionMethod::Replace => "replace",
            },
            if pre_validation {
                "pre_validation:\n  endpoint: https://hooks.internal/check\n  payload:\n    checks: [stock]\n"
            } else {
                ""
            }
        ))
        .unwrap();

        let package = Package {
            name: "Maestro de Productos".into(),
            description: None,
            mandatory: true,
            file_format: serde_yaml::from_str("type: CSV").unwrap(),
            catalogs: vec![CatalogRef {
                logical_name: "productos".into(),
                file_inside_archive: None,
                catalog: handle,
                source: RefSource::Inline,
                format_override: None,
            }],
            cross_rules: vec![],
            destination: Some(destination),
        };

        let table = Table::from_records(
            vec!["codigo".into(), "precio".into()],
            vec![
                vec!["A".into(), "10".into()],
                vec!["B".into(), "20".into()],
            ],
        )
        .unwrap();
        let mut tables = BTreeMap::new();
        tables.insert("productos".to_string(), table);

        let submission = Submission::new(
            "TEST001",
            "Maestro de Productos",
            crate::domain::schema::Channel::Api,
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );

        (schema, package, tables, submission)
    }

    #[tokio::test]
    async fn test_insert_commits_rows() {
        let (schema, package, tables, submission) = fixture(InsertionMethod::Insert, false);
        let sink = MemoryConnector::new();

        let diagnostic =
            Sink::apply(&schema, &package, &tables, &submission, &sink, None).await;
        assert!(!diagnostic.has_errors(), "{:?}", diagnostic);
        assert_eq!(sink.row_count("productos"), 2);
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        // P4: byte-identical resubmission with upsert leaves the table unchanged
        let (schema, package, tables, submission) = fixture(InsertionMethod::Upsert, false);
        let sink = MemoryConnector::new();

        for _ in 0..2 {
            let diagnostic =
                Sink::apply(&schema, &package, &tables, &submission, &sink, None).await;
            assert!(!diagnostic.has_errors());
        }
        assert_eq!(sink.row_count("productos"), 2);
    }

    #[tokio::test]
    async fn test_replace_leaves_exactly_input_rows() {
        // P5: no leftover rows from prior runs
        let (schema, package, tables, submission) = fixture(InsertionMethod::Replace, false);
        let sink = MemoryConnector::new();

        // Seed a prior state
        {
            let mut tx = sink.begin().await.unwrap();
            tx.insert(
                "productos",
                &["codigo".to_string(), "precio".to_string()],
                &[vec![Scalar::Str("VIEJO".into()), Scalar::Number(1.0)]],
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let diagnostic =
            Sink::apply(&schema, &package, &tables, &submission, &sink, None).await;
        assert!(!diagnostic.has_errors());

        let table = sink.table("productos").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert!(table
            .rows
            .iter()
            .all(|row| row[0].render() != "VIEJO"));
    }

    #[tokio::test]
    async fn test_replace_delete_failure_rolls_back() {
        // Scenario 6: database error on delete => one ERROR scope=catalog,
        // target table unchanged.
        let (schema, package, tables, submission) = fixture(InsertionMethod::Replace, false);
        let sink = MemoryConnector::new().failing_on_delete();

        {
            let mut tx = sink.begin().await.unwrap();
            tx.insert(
                "productos",
                &["codigo".to_string(), "precio".to_string()],
                &[vec![Scalar::Str("VIEJO".into()), Scalar::Number(1.0)]],
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let diagnostic =
            Sink::apply(&schema, &package, &tables, &submission, &sink, None).await;

        let errors: Vec<_> = diagnostic
            .findings
            .iter()
            .filter(|f| f.severity == crate::domain::diagnostic::Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].scope, FindingScope::Catalog);
        assert_eq!(sink.row_count("productos"), 1);
    }

    #[tokio::test]
    async fn test_insert_conflict_rolls_back() {
        let (schema, package, tables, submission) = fixture(InsertionMethod::Insert, false);
        let sink = MemoryConnector::new().with_unique_keys("productos", &["codigo"]);

        {
            let mut tx = sink.begin().await.unwrap();
            tx.insert(
                "productos",
                &["codigo".to_string(), "precio".to_string()],
                &[vec![Scalar::Str("A".into()), Scalar::Number(9.0)]],
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let diagnostic =
            Sink::apply(&schema, &package, &tables, &submission, &sink, None).await;
        assert!(diagnostic.has_errors());
        // The pre-existing row is untouched
        assert_eq!(sink.row_count("productos"), 1);
    }

    #[tokio::test]
    async fn test_pre_validation_rejection_aborts_with_body() {
        let (schema, package, tables, submission) = fixture(InsertionMethod::Insert, true);
        let sink = MemoryConnector::new();
        let hook = StubHook::returning(422, "stock check failed");

        let diagnostic =
            Sink::apply(&schema, &package, &tables, &submission, &sink, Some(&hook)).await;

        assert!(diagnostic.has_errors());
        assert!(diagnostic.findings[0].message.contains("HTTP 422"));
        assert!(diagnostic.findings[0].message.contains("stock check failed"));
        assert_eq!(sink.row_count("productos"), 0);
    }

    #[tokio::test]
    async fn test_pre_validation_success_commits() {
        let (schema, package, tables, submission) = fixture(InsertionMethod::Insert, true);
        let sink = MemoryConnector::new();
        let hook = StubHook::returning(200, "ok");

        let diagnostic =
            Sink::apply(&schema, &package, &tables, &submission, &sink, Some(&hook)).await;
        assert!(!diagnostic.has_errors(), "{:?}", diagnostic);
        assert_eq!(sink.row_count("productos"), 2);

        // The staging scratch table was committed alongside (memory
        // adapter keeps it); its name embeds the submission id.
        let staging = format!("stage_{}_productos", submission.submission_id);
        assert_eq!(sink.row_count(&staging), 2);
    }
}
