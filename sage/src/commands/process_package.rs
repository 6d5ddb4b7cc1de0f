// sage/src/commands/process_package.rs
//
// USE CASE: run the full validation pipeline over a local file,
// without touching the database sink.

use std::path::PathBuf;

use sage_core::application::controller::RunController;
use sage_core::application::loader::Loader;
use sage_core::domain::submission::Submission;

use crate::cli::OutputFormat;
use crate::commands::{parse_channel, report};

pub fn execute(
    archive_path: PathBuf,
    package_doc: PathBuf,
    sender_id: String,
    channel: String,
    format: OutputFormat,
) -> i32 {
    let Some(channel) = parse_channel(&channel) else {
        return report::usage_error(&format!("unknown channel '{}'", channel));
    };

    let blob = match std::fs::read(&archive_path) {
        Ok(blob) => blob,
        Err(e) => {
            return report::usage_error(&format!(
                "cannot read '{}': {}",
                archive_path.display(),
                e
            ))
        }
    };

    let loaded = Loader::load_package(&package_doc);
    let Some(schema) = loaded.schema else {
        return report::render(&loaded.diagnostic, format);
    };

    // The package document drives the run; its first package is the one
    // being submitted.
    let Some(package_name) = schema.packages.first().map(|p| p.name.clone()) else {
        return report::usage_error("package document declares no package");
    };

    let filename = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let submission = Submission::new(sender_id, package_name, channel, chrono_now())
        .with_filename(filename);

    let controller = RunController::new(&schema);
    let mut diagnostic = loaded.diagnostic;
    diagnostic.extend(controller.validate(&blob, &submission));

    report::render(&diagnostic, format)
}

fn chrono_now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}
