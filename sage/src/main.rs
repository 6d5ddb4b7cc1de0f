// sage/src/main.rs
//
// Thin dispatcher — parses CLI args and routes to command handlers.
// Exit codes: 0 = success, 1 = any ERROR finding, 2 = usage/IO error.

mod cli;
mod commands;

use clap::Parser;
use cli::Commands;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = cli::Cli::parse();

    let exit_code = match cli.command {
        Commands::ValidateYaml { path, kind } => commands::validate_yaml::execute(path, kind, cli.format),

        Commands::ProcessPackage {
            archive_path,
            package_doc,
            sender_id,
            channel,
        } => commands::process_package::execute(archive_path, package_doc, sender_id, channel, cli.format),

        Commands::ValidateSender {
            sender_doc,
            package_name,
            sender_id,
            channel,
        } => commands::validate_sender::execute(sender_doc, package_name, sender_id, channel, cli.format),
    };

    std::process::exit(exit_code);
}
