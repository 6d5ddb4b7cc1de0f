// sage-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    // Expression could not be parsed
    #[error("Expression parse error at offset {offset}: {message}")]
    #[diagnostic(
        code(sage::domain::expr_parse),
        help("Check the validation_expression syntax. Comparisons combined with & or | must be parenthesized.")
    )]
    ExpressionParse { offset: usize, message: String },

    // Expression referenced a column the input does not declare
    #[error("Unknown column '{column}' in expression")]
    #[diagnostic(code(sage::domain::unknown_column))]
    UnknownColumn { column: String },

    // Expression referenced a catalog logical name outside package scope
    #[error("Unknown table '{table}' in expression")]
    #[diagnostic(
        code(sage::domain::unknown_table),
        help("Cross-catalog access df['name'][...] is only valid in package-level rules.")
    )]
    UnknownTable { table: String },

    // Expression evaluated to something the current scope cannot use
    #[error("Expression evaluation error: {0}")]
    #[diagnostic(code(sage::domain::expr_eval))]
    ExpressionEval(String),

    // Schema invariant broken after loading (programmer error, not sender data)
    #[error("Schema invariant violated: {0}")]
    #[diagnostic(code(sage::domain::schema))]
    SchemaInvariant(String),

    // Lookup failures on the loaded Schema
    #[error("Package '{0}' not found in schema")]
    #[diagnostic(code(sage::domain::package_not_found))]
    PackageNotFound(String),

    #[error("Catalog '{0}' not found in schema")]
    #[diagnostic(code(sage::domain::catalog_not_found))]
    CatalogNotFound(String),
}
