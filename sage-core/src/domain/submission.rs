// sage-core/src/domain/submission.rs

use chrono::{NaiveDate, NaiveDateTime};
use std::time::Duration;

use crate::domain::schema::Channel;

/// Credential presented alongside a submission, checked by the Gate
/// against the sender's channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCredential {
    ApiKey(String),
    /// Envelope sender of the carrying email.
    EmailEnvelope(String),
    /// Source host of the SFTP drop.
    SftpSourceHost(String),
    None,
}

/// One file arriving at the system. Ephemeral: created by the Run
/// Controller, gone once the Diagnostic is returned.
#[derive(Debug, Clone)]
pub struct Submission {
    pub submission_id: String,
    pub sender_id: String,
    pub package_name: String,
    pub channel: Channel,
    pub filename: Option<String>,
    /// Local receipt time; the Gate's deadline window and the
    /// expression engine's now() both read this.
    pub received_at: NaiveDateTime,
    /// The date the submission covers — recovered from the `{date}`
    /// filename placeholder when present, else the receipt date. The
    /// Gate closes the deadline window relative to this date, so a
    /// file for yesterday arriving past midnight is still late.
    pub window_date: Option<NaiveDate>,
    pub credential: ChannelCredential,
    /// Remaining processing budget. Expiry cancels the run (distinct
    /// outcome, no Diagnostic).
    pub deadline: Option<Duration>,
}

impl Submission {
    pub fn new(
        sender_id: impl Into<String>,
        package_name: impl Into<String>,
        channel: Channel,
        received_at: NaiveDateTime,
    ) -> Self {
        let sender_id = sender_id.into();
        let package_name = package_name.into();
        // Deterministic enough for staging-table uniqueness across
        // concurrent submissions of different senders/packages/times.
        let submission_id = format!(
            "{}_{}",
            sender_id.to_lowercase(),
            received_at.format("%Y%m%d%H%M%S%f")
        );
        Self {
            submission_id,
            sender_id,
            package_name,
            channel,
            filename: None,
            received_at,
            window_date: None,
            credential: ChannelCredential::None,
            deadline: None,
        }
    }

    /// The window this submission targets (receipt date by default).
    pub fn effective_window_date(&self) -> NaiveDate {
        self.window_date.unwrap_or_else(|| self.received_at.date())
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_window_date(mut self, date: NaiveDate) -> Self {
        self.window_date = Some(date);
        self
    }

    pub fn with_credential(mut self, credential: ChannelCredential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
