// sage-core/src/application/controller.rs
//
// Pure orchestration: Gate -> Reader -> Validator -> (conditionally)
// Sink. The controller owns no I/O threads; callers supply the
// concurrency. A deadline that expires during the Sink phase yields
// Outcome::Cancelled — accumulated findings are discarded and any open
// transaction rolls back when it drops.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::application::gate::SenderGate;
use crate::application::reader::{self, FileReader};
use crate::application::sink::Sink;
use crate::application::validator::Validator;
use crate::domain::diagnostic::{Diagnostic, Finding, FindingScope, Outcome};
use crate::domain::schema::{Package, Schema};
use crate::domain::submission::Submission;
use crate::domain::table::Table;
use crate::infrastructure::adapters::{HttpHook, SqlxConnector};
use crate::ports::connector::SinkConnector;
use crate::ports::hook::PreValidationHook;

pub struct RunController<'a> {
    schema: &'a Schema,
}

impl<'a> RunController<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Full pipeline through the Validator, no Sink.
    pub fn validate(&self, blob: &[u8], submission: &Submission) -> Diagnostic {
        self.run_pipeline(blob, submission).0
    }

    /// Gate -> Reader -> Validator, once. The coerced tables come back
    /// alongside the Diagnostic so a following Sink phase never has to
    /// re-read the blob.
    #[instrument(skip_all, fields(package = %submission.package_name, sender = %submission.sender_id))]
    fn run_pipeline(
        &self,
        blob: &[u8],
        submission: &Submission,
    ) -> (Diagnostic, BTreeMap<String, Table>) {
        let mut submission = submission.clone();

        // Recover the window date from the {date} filename placeholder
        // BEFORE the gate: its deadline window is anchored to it.
        if submission.window_date.is_none() {
            if let Ok(package) = self.schema.package(&submission.package_name) {
                if let (Some(pattern), Some(filename)) = (
                    package.file_format.filename_pattern.as_deref(),
                    submission.filename.as_deref(),
                ) {
                    submission.window_date = reader::extract_date(pattern, filename);
                }
            }
        }

        let mut diagnostic = SenderGate::check(self.schema, &submission);
        if diagnostic.has_errors() {
            // Terminal: the Reader is never invoked.
            return (diagnostic, BTreeMap::new());
        }

        let package = match self.schema.package(&submission.package_name) {
            Ok(package) => package,
            Err(e) => {
                diagnostic.push(Finding::error(FindingScope::File, e.to_string()));
                return (diagnostic, BTreeMap::new());
            }
        };

        let mut output = FileReader::read_package(self.schema, package, blob, &submission);
        diagnostic.extend(output.diagnostic);

        Validator::run(
            self.schema,
            package,
            &mut output.tables,
            submission.received_at,
            &mut diagnostic,
        );

        info!(
            findings = diagnostic.len(),
            status = ?diagnostic.status(),
            "validation finished"
        );
        (diagnostic, output.tables)
    }

    /// Full pipeline; on a clean Diagnostic, applies the Sink through
    /// the provided ports. Used directly by tests and by callers that
    /// manage their own connection pools.
    pub async fn process_with(
        &self,
        blob: &[u8],
        submission: &Submission,
        connector: &dyn SinkConnector,
        hook: Option<&dyn PreValidationHook>,
    ) -> Outcome {
        let (mut diagnostic, tables) = self.run_pipeline(blob, submission);
        if diagnostic.has_errors() {
            return Outcome::Completed(diagnostic);
        }

        let Ok(package) = self.schema.package(&submission.package_name) else {
            return Outcome::Completed(diagnostic);
        };

        let enabled = package
            .destination
            .as_ref()
            .map(|d| d.enabled)
            .unwrap_or(false);
        if !enabled {
            return Outcome::Completed(diagnostic);
        }

        match self
            .sink_phase(package, &tables, submission, connector, hook)
            .await
        {
            Some(sink_diagnostic) => {
                diagnostic.extend(sink_diagnostic);
                Outcome::Completed(diagnostic)
            }
            None => Outcome::Cancelled,
        }
    }

    /// As process_with, building the adapters from the package's
    /// Destination configuration.
    pub async fn process(&self, blob: &[u8], submission: &Submission) -> Outcome {
        let (mut diagnostic, tables) = self.run_pipeline(blob, submission);
        if diagnostic.has_errors() {
            return Outcome::Completed(diagnostic);
        }

        let Ok(package) = self.schema.package(&submission.package_name) else {
            return Outcome::Completed(diagnostic);
        };
        let Some(destination) = package.destination.as_ref().filter(|d| d.enabled) else {
            return Outcome::Completed(diagnostic);
        };

        let connector = match SqlxConnector::connect(&destination.connection, 1).await {
            Ok(connector) => connector,
            Err(e) => {
                diagnostic.push(Finding::error(
                    FindingScope::Catalog,
                    format!("cannot connect to destination: {}", e),
                ));
                return Outcome::Completed(diagnostic);
            }
        };

        let hook = HttpHook::new();
        match self
            .sink_phase(package, &tables, submission, &connector, Some(&hook))
            .await
        {
            Some(sink_diagnostic) => {
                diagnostic.extend(sink_diagnostic);
                Outcome::Completed(diagnostic)
            }
            None => Outcome::Cancelled,
        }
    }

    /// Run the Sink under the submission's deadline. None = cancelled;
    /// the dropped future released its transaction, so nothing was
    /// committed.
    async fn sink_phase(
        &self,
        package: &Package,
        tables: &BTreeMap<String, Table>,
        submission: &Submission,
        connector: &dyn SinkConnector,
        hook: Option<&dyn PreValidationHook>,
    ) -> Option<Diagnostic> {
        let sink_future = Sink::apply(self.schema, package, tables, submission, connector, hook);

        match submission.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, sink_future).await {
                Ok(result) => Some(result),
                Err(_) => {
                    info!("submission cancelled: deadline exceeded during sink phase");
                    None
                }
            },
            None => Some(sink_future.await),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::loader::Loader;
    use crate::domain::diagnostic::Severity;
    use crate::domain::schema::Channel;
    use crate::infrastructure::adapters::MemoryConnector;
    use chrono::NaiveDate;
    use std::io::Write;

    fn received() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn write_fixtures(dir: &std::path::Path, enabled: bool) -> Schema {
        std::fs::write(
            dir.join("productos.yaml"),
            r#"
catalog:
  name: productos
  fields:
    - name: codigo_producto
      type: text
      required: true
      unique: true
    - name: precio_lista
      type: number
      decimals: 2
"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("package.yaml"),
            format!(
                r#"
package:
  name: Maestro de Productos
  file_format:
    type: ZIP
  catalogs:
    - name: productos
      file: productos.csv
      path: productos.yaml
  destination:
    enabled: {}
    target_table: productos
    insertion_method: insert
    connection:
      driver: postgresql
      host: db
      database: sage
"#,
                enabled
            ),
        )
        .unwrap();
        Loader::load_package(dir.join("package.yaml")).schema.unwrap()
    }

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn submission() -> Submission {
        Submission::new(
            "TEST001",
            "Maestro de Productos",
            Channel::Api,
            received(),
        )
    }

    #[tokio::test]
    async fn test_clean_run_reaches_enabled_sink() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixtures(dir.path(), true);
        let controller = RunController::new(&schema);
        let sink = MemoryConnector::new();

        let blob = zip_with(&[(
            "productos.csv",
            "codigo_producto,precio_lista\nA,10.50\nB,20\n",
        )]);

        let outcome = controller
            .process_with(&blob, &submission(), &sink, None)
            .await;

        let diagnostic = outcome.diagnostic().unwrap();
        assert!(!diagnostic.has_errors(), "{:?}", diagnostic);
        assert_eq!(sink.row_count("productos"), 2);
    }

    #[tokio::test]
    async fn test_disabled_destination_skips_sink() {
        // P1: clean Diagnostic, Destination.enabled=false => no Sink.
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixtures(dir.path(), false);
        let controller = RunController::new(&schema);
        let sink = MemoryConnector::new();

        let blob = zip_with(&[(
            "productos.csv",
            "codigo_producto,precio_lista\nA,10.50\n",
        )]);

        let outcome = controller
            .process_with(&blob, &submission(), &sink, None)
            .await;

        assert!(!outcome.diagnostic().unwrap().has_errors());
        assert_eq!(sink.row_count("productos"), 0);
    }

    #[tokio::test]
    async fn test_validation_errors_block_sink() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixtures(dir.path(), true);
        let controller = RunController::new(&schema);
        let sink = MemoryConnector::new();

        // duplicate + null: two field errors
        let blob = zip_with(&[(
            "productos.csv",
            "codigo_producto,precio_lista\nA,10\nA,20\n,30\n",
        )]);

        let outcome = controller
            .process_with(&blob, &submission(), &sink, None)
            .await;

        let diagnostic = outcome.diagnostic().unwrap();
        assert!(diagnostic.has_errors());
        assert_eq!(sink.row_count("productos"), 0);
    }

    #[tokio::test]
    async fn test_gate_error_prevents_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = write_fixtures(dir.path(), true);
        schema.roster = Some(
            serde_yaml::from_str(
                r#"
senders_list:
  - sender_id: TEST001
    name: Centro
    allowed_methods: [sftp]
    configurations:
      sftp:
        host: sftp.example
    packages:
      - name: Maestro de Productos
"#,
            )
            .unwrap(),
        );
        let controller = RunController::new(&schema);

        // api is not among allowed_methods; blob is deliberately
        // garbage — the Reader must never see it.
        let outcome = controller
            .process_with(b"not a zip", &submission(), &MemoryConnector::new(), None)
            .await;

        let diagnostic = outcome.diagnostic().unwrap();
        assert_eq!(diagnostic.len(), 1);
        assert_eq!(diagnostic.findings[0].scope, FindingScope::Authorization);
        assert_eq!(diagnostic.findings[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_unknown_package_is_file_finding() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixtures(dir.path(), true);
        let controller = RunController::new(&schema);

        let submission = Submission::new("TEST001", "No Existe", Channel::Api, received());
        let diagnostic = controller.validate(b"", &submission);
        assert!(diagnostic.has_errors());
        assert_eq!(diagnostic.findings[0].scope, FindingScope::File);
    }

    #[tokio::test]
    async fn test_findings_order_is_deterministic() {
        // P2: two identical runs emit identical findings, in order.
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixtures(dir.path(), true);
        let controller = RunController::new(&schema);

        let blob = zip_with(&[(
            "productos.csv",
            "codigo_producto,precio_lista,extra\nA,10.123\nA,abc\n,5\n",
        )]);

        let first = controller.validate(&blob, &submission());
        let second = controller.validate(&blob, &submission());
        assert_eq!(first, second);
        assert!(first.len() > 1);
    }
}
