// sage-core/src/domain/schema/sender.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderRoster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corporate_owner: Option<String>,

    /// Who receives the validation report for each run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_receivers: Vec<DataReceiver>,

    pub senders_list: Vec<Sender>,
}

impl SenderRoster {
    pub fn sender(&self, sender_id: &str) -> Option<&Sender> {
        self.senders_list.iter().find(|s| s.sender_id == sender_id)
    }

    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen = std::collections::HashSet::new();
        for sender in &self.senders_list {
            if !seen.insert(sender.sender_id.as_str()) {
                problems.push(format!("duplicate sender_id '{}'", sender.sender_id));
            }
            problems.extend(sender.structural_problems());
        }

        problems
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReceiver {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub sender_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible_person: Option<ResponsiblePerson>,

    pub allowed_methods: Vec<Channel>,

    #[serde(default)]
    pub configurations: ChannelConfigurations,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_frequency: Option<SubmissionFrequency>,

    /// Packages this sender may submit. Entries reference the package
    /// document by name, optionally with a path resolved by the Loader.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageGrant>,
}

impl Sender {
    pub fn is_channel_allowed(&self, channel: Channel) -> bool {
        self.allowed_methods.contains(&channel)
    }

    pub fn is_package_granted(&self, package_name: &str) -> bool {
        self.packages.iter().any(|p| p.name == package_name)
    }

    fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        // Every allowed channel must carry its configuration block.
        for channel in &self.allowed_methods {
            let configured = match channel {
                Channel::Sftp => self.configurations.sftp.is_some(),
                Channel::Email => self.configurations.email.is_some(),
                Channel::Api => self.configurations.api.is_some(),
                Channel::Filesystem => self.configurations.filesystem.is_some(),
                Channel::DirectUpload => self.configurations.direct_upload.is_some(),
            };
            if !configured {
                problems.push(format!(
                    "sender '{}': missing configuration for allowed method '{}'",
                    self.sender_id, channel
                ));
            }
        }

        problems
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsiblePerson {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sftp,
    Email,
    Api,
    Filesystem,
    DirectUpload,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sftp => write!(f, "sftp"),
            Channel::Email => write!(f, "email"),
            Channel::Api => write!(f, "api"),
            Channel::Filesystem => write!(f, "filesystem"),
            Channel::DirectUpload => write!(f, "direct_upload"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfigurations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftp: Option<SftpConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_upload: Option<DirectUploadConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Envelope senders accepted for this data sender.
    pub allowed_senders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectUploadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<u64>,
}

// =============================================================================
//  SUBMISSION CADENCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionFrequency {
    #[serde(rename = "type")]
    pub cadence: Cadence,

    pub deadline: Deadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

/// Deadline of the submission window. `time` always applies;
/// `day_of_week` is read for weekly cadence, `day` (of month) for
/// monthly cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deadline {
    /// "HH:MM", local time.
    pub time: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageGrant {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
