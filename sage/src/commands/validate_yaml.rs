// sage/src/commands/validate_yaml.rs
//
// USE CASE: structural validation of one configuration document.

use std::path::PathBuf;

use sage_core::application::loader::{DocumentKind, Loader};

use crate::cli::{DocumentKindArg, OutputFormat};
use crate::commands::report;

pub fn execute(path: PathBuf, kind: DocumentKindArg, format: OutputFormat) -> i32 {
    if !path.exists() {
        return report::usage_error(&format!("document not found: {}", path.display()));
    }

    let kind = match kind {
        DocumentKindArg::Catalog => DocumentKind::Catalog,
        DocumentKindArg::Package => DocumentKind::Package,
        DocumentKindArg::Sender => DocumentKind::Sender,
    };

    let diagnostic = Loader::validate_document(&path, kind);
    report::render(&diagnostic, format)
}
