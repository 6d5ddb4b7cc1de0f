// sage/src/commands/mod.rs

pub mod process_package;
pub mod report;
pub mod validate_sender;
pub mod validate_yaml;

use sage_core::domain::schema::Channel;

/// Map a CLI channel string onto the intake channel enum.
/// Unknown channels are a usage error (exit code 2).
pub fn parse_channel(raw: &str) -> Option<Channel> {
    match raw {
        "sftp" => Some(Channel::Sftp),
        "email" => Some(Channel::Email),
        "api" => Some(Channel::Api),
        "filesystem" => Some(Channel::Filesystem),
        "direct_upload" => Some(Channel::DirectUpload),
        _ => None,
    }
}
