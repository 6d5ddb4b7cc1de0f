// sage/src/commands/report.rs
//
// Shared Diagnostic rendering for every subcommand.

use sage_core::domain::diagnostic::{Diagnostic, DiagnosticStatus, Severity};

use crate::cli::OutputFormat;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FINDINGS: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Print the Diagnostic and return the process exit code.
pub fn render(diagnostic: &Diagnostic, format: OutputFormat) -> i32 {
    match format {
        OutputFormat::Json => render_json(diagnostic),
        OutputFormat::Text => render_text(diagnostic),
    }

    match diagnostic.status() {
        DiagnosticStatus::Error => EXIT_FINDINGS,
        DiagnosticStatus::Success | DiagnosticStatus::Warning => EXIT_OK,
    }
}

fn render_json(diagnostic: &Diagnostic) {
    // Serialization of plain data cannot fail
    if let Ok(body) = serde_json::to_string_pretty(diagnostic) {
        println!("{}", body);
    }
}

fn render_text(diagnostic: &Diagnostic) {
    for finding in &diagnostic.findings {
        let icon = match finding.severity {
            Severity::Error => "❌",
            Severity::Warning => "⚠️ ",
            Severity::Info => "ℹ️ ",
        };
        println!("{} {}", icon, finding);
    }

    match diagnostic.status() {
        DiagnosticStatus::Success => println!("✅ Validation successful"),
        DiagnosticStatus::Warning => println!("✅ Validation successful (with warnings)"),
        DiagnosticStatus::Error => {
            let errors = diagnostic
                .findings
                .iter()
                .filter(|f| f.severity == Severity::Error)
                .count();
            eprintln!("❌ Validation failed: {} error(s)", errors);
        }
    }
}

pub fn usage_error(message: &str) -> i32 {
    eprintln!("❌ {}", message);
    EXIT_USAGE
}
