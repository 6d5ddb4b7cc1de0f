use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use tempfile::TempDir;

/// Abstraction for managing the sage test environment.
struct SageTestEnv {
    _tmp: TempDir,
    root: PathBuf,
}

impl SageTestEnv {
    fn new() -> Self {
        #[allow(clippy::unwrap_used)]
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        Self { _tmp: tmp, root }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.join(name);
        #[allow(clippy::unwrap_used)]
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_zip(&self, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = self.root.join(name);
        #[allow(clippy::unwrap_used)]
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            for (entry_name, contents) in entries {
                writer.start_file(*entry_name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        path
    }

    fn sage(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sage"));
        cmd.current_dir(&self.root);
        cmd
    }
}

const CATALOG_YAML: &str = r#"
catalog:
  name: productos
  description: Maestro de productos
  fields:
    - name: codigo_producto
      type: text
      length: 20
      required: true
      unique: true
    - name: precio_lista
      type: number
      decimals: 2
      validation_rules:
        - name: precio_positivo
          validation_expression: "df['precio_lista'] > 0"
          message: El precio debe ser positivo
    - name: estado
      type: enum
      allowed_values: [Activo, Descontinuado, Proximamente]
"#;

const PACKAGE_YAML: &str = r#"
package:
  name: Maestro de Productos
  file_format:
    type: ZIP
  catalogs:
    - name: productos
      file: productos.csv
      path: productos.yaml
"#;

const SENDER_YAML: &str = r#"
senders:
  corporate_owner: Distribuidora Norte
  senders_list:
    - sender_id: TEST001
      name: Sucursal Centro
      allowed_methods: [sftp, email]
      configurations:
        sftp:
          host: sftp.sucursal.example
        email:
          allowed_senders: [reportes@sucursal.example]
      packages:
        - name: Maestro de Productos
"#;

fn path_str(path: &Path) -> &str {
    #[allow(clippy::unwrap_used)]
    path.to_str().unwrap()
}

#[test]
fn test_validate_yaml_catalog_ok() {
    let env = SageTestEnv::new();
    let catalog = env.write("productos.yaml", CATALOG_YAML);

    env.sage()
        .args(["validate-yaml", path_str(&catalog), "catalog"])
        .assert()
        .success()
        .stdout(predicates::str::contains("✅"));
}

#[test]
fn test_validate_yaml_broken_catalog_exits_1() {
    let env = SageTestEnv::new();
    let catalog = env.write(
        "broken.yaml",
        "catalog:\n  name: broken\n  fields:\n    - name: estado\n      type: enum\n",
    );

    env.sage()
        .args(["validate-yaml", path_str(&catalog), "catalog"])
        .assert()
        .code(1)
        .stdout(predicates::str::contains("allowed_values"));
}

#[test]
fn test_validate_yaml_missing_file_exits_2() {
    let env = SageTestEnv::new();
    env.sage()
        .args(["validate-yaml", "no_such_file.yaml", "catalog"])
        .assert()
        .code(2);
}

#[test]
fn test_process_package_clean_archive() {
    let env = SageTestEnv::new();
    env.write("productos.yaml", CATALOG_YAML);
    let package = env.write("package.yaml", PACKAGE_YAML);
    let archive = env.write_zip(
        "datos.zip",
        &[(
            "productos.csv",
            "codigo_producto,precio_lista,estado\nPROD0001,10.50,Activo\nPROD0002,20,Descontinuado\n",
        )],
    );

    env.sage()
        .args([
            "process-package",
            path_str(&archive),
            path_str(&package),
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("✅"));
}

#[test]
fn test_process_package_reports_findings_and_exits_1() {
    let env = SageTestEnv::new();
    env.write("productos.yaml", CATALOG_YAML);
    let package = env.write("package.yaml", PACKAGE_YAML);
    // duplicate code + negative price + invalid enum value
    let archive = env.write_zip(
        "datos.zip",
        &[(
            "productos.csv",
            "codigo_producto,precio_lista,estado\nPROD0001,10,Activo\nPROD0001,-5,activo\n",
        )],
    );

    env.sage()
        .args([
            "process-package",
            path_str(&archive),
            path_str(&package),
        ])
        .assert()
        .code(1)
        .stdout(predicates::str::contains("duplicate value"))
        .stdout(predicates::str::contains("El precio debe ser positivo"));
}

#[test]
fn test_process_package_json_output() {
    let env = SageTestEnv::new();
    env.write("productos.yaml", CATALOG_YAML);
    let package = env.write("package.yaml", PACKAGE_YAML);
    let archive = env.write_zip(
        "datos.zip",
        &[(
            "productos.csv",
            "codigo_producto,precio_lista,estado\nPROD0001,10,Activo\n",
        )],
    );

    let output = env
        .sage()
        .args([
            "--format",
            "json",
            "process-package",
            path_str(&archive),
            path_str(&package),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    // The serialized Diagnostic is the shape callers persist
    #[allow(clippy::unwrap_used)]
    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert!(parsed.get("findings").is_some());
}

#[test]
fn test_validate_sender_disallowed_channel_exits_1() {
    // Sender allows sftp/email only; a submission via api is refused
    let env = SageTestEnv::new();
    let sender = env.write("senders.yaml", SENDER_YAML);

    env.sage()
        .args([
            "validate-sender",
            path_str(&sender),
            "Maestro de Productos",
            "--channel",
            "api",
        ])
        .assert()
        .code(1)
        .stdout(predicates::str::contains("not allowed"));
}

#[test]
fn test_validate_sender_granted_package_ok() {
    let env = SageTestEnv::new();
    let sender = env.write("senders.yaml", SENDER_YAML);

    env.sage()
        .args([
            "validate-sender",
            path_str(&sender),
            "Maestro de Productos",
            "--channel",
            "sftp",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("✅"));
}

#[test]
fn test_validate_sender_unknown_package_exits_1() {
    let env = SageTestEnv::new();
    let sender = env.write("senders.yaml", SENDER_YAML);

    env.sage()
        .args([
            "validate-sender",
            path_str(&sender),
            "Paquete Fantasma",
            "--channel",
            "sftp",
        ])
        .assert()
        .code(1)
        .stdout(predicates::str::contains("not authorized"));
}
