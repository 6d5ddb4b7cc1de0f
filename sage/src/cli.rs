// sage/src/cli.rs

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sage")]
#[command(version)]
#[command(about = "Declarative data-ingestion and validation engine", long_about = None)]
pub struct Cli {
    /// Output format for the Diagnostic
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocumentKindArg {
    Catalog,
    Package,
    Sender,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Structurally validate a configuration document
    ValidateYaml {
        /// Path to the YAML document
        path: std::path::PathBuf,

        /// Document class
        #[arg(value_enum)]
        kind: DocumentKindArg,
    },

    /// Run the full validation pipeline over an archive (no database sink)
    ProcessPackage {
        /// Path to the data file or archive
        archive_path: std::path::PathBuf,

        /// Path to the package document
        package_doc: std::path::PathBuf,

        /// Sender id substituted into filename patterns
        #[arg(long, default_value = "LOCAL")]
        sender_id: String,

        /// Intake channel recorded on the submission
        #[arg(long, default_value = "filesystem")]
        channel: String,
    },

    /// Check sender authorization for a package (gate only)
    ValidateSender {
        /// Path to the sender document
        sender_doc: std::path::PathBuf,

        /// Declared package name
        package_name: String,

        /// Sender id of the submission (defaults to the first in the roster)
        #[arg(long)]
        sender_id: Option<String>,

        /// Intake channel of the submission
        #[arg(long, default_value = "filesystem")]
        channel: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_validate_yaml() {
        let args = Cli::parse_from(["sage", "validate-yaml", "catalog.yaml", "catalog"]);
        match args.command {
            Commands::ValidateYaml { kind, .. } => {
                assert_eq!(kind, DocumentKindArg::Catalog);
            }
            _ => panic!("Expected ValidateYaml command"),
        }
    }

    #[test]
    fn test_parse_process_package_defaults() {
        let args = Cli::parse_from(["sage", "process-package", "data.zip", "package.yaml"]);
        match args.command {
            Commands::ProcessPackage {
                sender_id, channel, ..
            } => {
                assert_eq!(sender_id, "LOCAL");
                assert_eq!(channel, "filesystem");
            }
            _ => panic!("Expected ProcessPackage command"),
        }
    }

    #[test]
    fn test_parse_json_format_flag() {
        let args = Cli::parse_from([
            "sage",
            "--format",
            "json",
            "validate-yaml",
            "x.yaml",
            "package",
        ]);
        assert_eq!(args.format, OutputFormat::Json);
    }
}
