// sage-core/src/infrastructure/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- FILESYSTEM (IO) ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(sage::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    // --- CONFIG / YAML ---
    #[error("YAML Parsing Error: {0}")]
    #[diagnostic(
        code(sage::infra::yaml),
        help("Check your YAML syntax (indentation, types).")
    )]
    YamlError(#[from] serde_yaml::Error),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Configuration document not found at '{0}'")]
    #[diagnostic(code(sage::infra::config_missing))]
    ConfigNotFound(String),

    // --- SECRETS ---
    #[error("Missing environment variable for secret placeholder '{0}'")]
    #[diagnostic(
        code(sage::infra::secret),
        help("Export the variable before loading the configuration.")
    )]
    SecretMissing(String),

    // --- INPUT DECODING ---
    #[error("CSV Error: {0}")]
    #[diagnostic(code(sage::infra::csv))]
    CsvError(#[from] csv::Error),

    #[error("Spreadsheet Error: {0}")]
    #[diagnostic(code(sage::infra::xlsx))]
    ExcelError(#[from] calamine::Error),

    #[error("JSON Error: {0}")]
    #[diagnostic(code(sage::infra::json))]
    JsonError(#[from] serde_json::Error),

    #[error("XML Error: {0}")]
    #[diagnostic(code(sage::infra::xml))]
    XmlError(#[from] quick_xml::Error),

    #[error("Archive Error: {0}")]
    #[diagnostic(code(sage::infra::zip))]
    ZipError(#[from] zip::result::ZipError),

    // --- DATABASE SINK ---
    #[error("Database Error: {0}")]
    #[diagnostic(code(sage::infra::database))]
    Database(#[from] sqlx::Error),

    /// Adapter-agnostic sink failure (conflicts, refused operations).
    #[error("Sink Error: {0}")]
    #[diagnostic(code(sage::infra::sink))]
    SinkError(String),

    #[error("Driver '{0}' has no connector adapter in this build")]
    #[diagnostic(
        code(sage::infra::driver),
        help("postgresql and mysql are pooled through sqlx; route other drivers through a custom SinkConnector.")
    )]
    UnsupportedDriver(String),

    // --- PRE-VALIDATION HOOK ---
    #[error("HTTP Error: {0}")]
    #[diagnostic(code(sage::infra::http))]
    Http(#[from] reqwest::Error),
}
