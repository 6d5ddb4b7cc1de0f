// sage-core/src/domain/diagnostic.rs
//
// The Finding list is the single error channel of a validation pass:
// every recoverable condition lands here, ordered deterministically
// (scope outer, declaration order inner, row order innermost).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingScope {
    Field,
    Row,
    Catalog,
    Package,
    File,
    Authorization,
}

/// Where in the input a Finding points. All parts are optional: an
/// authorization Finding has none of them, a field Finding usually has
/// all three. Row indexes are 1-based over the data rows (the header
/// does not count).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub scope: FindingScope,
    #[serde(default)]
    pub locator: Locator,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, scope: FindingScope, message: impl Into<String>) -> Self {
        Self {
            severity,
            scope,
            locator: Locator::default(),
            message: message.into(),
            observed_value: None,
            rule_name: None,
        }
    }

    pub fn error(scope: FindingScope, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, scope, message)
    }

    pub fn warning(scope: FindingScope, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, scope, message)
    }

    pub fn info(scope: FindingScope, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, scope, message)
    }

    // --- BUILDER HELPERS ---

    pub fn in_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.locator.catalog = Some(catalog.into());
        self
    }

    pub fn at_field(mut self, field: impl Into<String>) -> Self {
        self.locator.field = Some(field.into());
        self
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.locator.row = Some(row);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.observed_value = Some(value.into());
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule_name = Some(rule.into());
        self
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        if let Some(catalog) = &self.locator.catalog {
            write!(f, " (catalog: {})", catalog)?;
        }
        if let Some(field) = &self.locator.field {
            write!(f, " (field: {})", field)?;
        }
        if let Some(row) = self.locator.row {
            write!(f, " (row: {})", row)?;
        }
        if let Some(value) = &self.observed_value {
            write!(f, " (value: {})", value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Success,
    Warning,
    Error,
}

/// Ordered list of Findings for one run. Push order is emission order;
/// nothing here ever reorders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub findings: Vec<Finding>,
}

impl Diagnostic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn extend(&mut self, other: Diagnostic) {
        self.findings.extend(other.findings);
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn has_errors_in_catalog(&self, logical_name: &str) -> bool {
        self.findings.iter().any(|f| {
            f.severity == Severity::Error && f.locator.catalog.as_deref() == Some(logical_name)
        })
    }

    pub fn status(&self) -> DiagnosticStatus {
        if self.has_errors() {
            DiagnosticStatus::Error
        } else if self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Warning)
        {
            DiagnosticStatus::Warning
        } else {
            DiagnosticStatus::Success
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }
}

/// Result of a full run. A cancelled run has NO Diagnostic: partial
/// findings are discarded so callers cannot mistake them for a verdict.
#[derive(Debug)]
pub enum Outcome {
    Completed(Diagnostic),
    Cancelled,
}

impl Outcome {
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Outcome::Completed(d) => Some(d),
            Outcome::Cancelled => None,
        }
    }
}
