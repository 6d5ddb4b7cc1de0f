// sage/src/commands/validate_sender.rs
//
// USE CASE: sender authorization check only (the gate phase).

use std::path::PathBuf;

use sage_core::application::gate::SenderGate;
use sage_core::application::loader::Loader;
use sage_core::domain::submission::Submission;

use crate::cli::OutputFormat;
use crate::commands::{parse_channel, report};

pub fn execute(
    sender_doc: PathBuf,
    package_name: String,
    sender_id: Option<String>,
    channel: String,
    format: OutputFormat,
) -> i32 {
    let Some(channel) = parse_channel(&channel) else {
        return report::usage_error(&format!("unknown channel '{}'", channel));
    };

    let loaded = Loader::load_sender(&sender_doc);
    let Some(schema) = loaded.schema else {
        return report::render(&loaded.diagnostic, format);
    };

    // Default to the roster's first sender, matching the single-sender
    // documents the corpus ships.
    let sender_id = match sender_id.or_else(|| {
        schema
            .roster
            .as_ref()
            .and_then(|r| r.senders_list.first())
            .map(|s| s.sender_id.clone())
    }) {
        Some(sender_id) => sender_id,
        None => return report::usage_error("sender document has an empty senders_list"),
    };

    let submission = Submission::new(
        sender_id,
        package_name,
        channel,
        chrono::Local::now().naive_local(),
    );

    let mut diagnostic = loaded.diagnostic;
    diagnostic.extend(SenderGate::check(&schema, &submission));

    report::render(&diagnostic, format)
}
