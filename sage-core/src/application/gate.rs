// sage-core/src/application/gate.rs
//
// Answers one question before any file is read: may this Submission
// proceed? Identity, grant, channel and credential failures are
// terminal ERRORs; a missed deadline window is only a WARNING and
// processing continues.

use chrono::{NaiveTime, Timelike, Weekday};
use tracing::debug;

use crate::domain::diagnostic::{Diagnostic, Finding, FindingScope};
use crate::domain::schema::{Cadence, Channel, Deadline, Schema, Sender, SubmissionFrequency};
use crate::domain::submission::{ChannelCredential, Submission};

pub struct SenderGate;

impl SenderGate {
    pub fn check(schema: &Schema, submission: &Submission) -> Diagnostic {
        let mut diagnostic = Diagnostic::new();

        let Some(roster) = &schema.roster else {
            // No roster loaded: the caller runs without sender
            // authorization (e.g. process-package on a bare package).
            return diagnostic;
        };

        // 1. sender exists
        let Some(sender) = roster.sender(&submission.sender_id) else {
            diagnostic.push(Finding::error(
                FindingScope::Authorization,
                format!("unknown sender '{}'", submission.sender_id),
            ));
            return diagnostic;
        };

        // 2. package granted
        if !sender.is_package_granted(&submission.package_name) {
            diagnostic.push(Finding::error(
                FindingScope::Authorization,
                format!(
                    "sender '{}' is not authorized for package '{}'",
                    submission.sender_id, submission.package_name
                ),
            ));
            return diagnostic;
        }

        // 3. channel allowed
        if !sender.is_channel_allowed(submission.channel) {
            diagnostic.push(Finding::error(
                FindingScope::Authorization,
                format!(
                    "channel '{}' is not allowed for sender '{}' (allowed: {})",
                    submission.channel,
                    submission.sender_id,
                    sender
                        .allowed_methods
                        .iter()
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
            return diagnostic;
        }

        // 4. deadline window (late => WARNING, never terminal)
        if let Some(frequency) = &sender.submission_frequency {
            if let Some(warning) = check_deadline(frequency, submission) {
                diagnostic.push(warning);
            }
        }

        // 5. channel credentials
        if let Some(failure) = check_credential(sender, submission) {
            diagnostic.push(failure);
        }

        debug!(
            sender = %submission.sender_id,
            package = %submission.package_name,
            ok = !diagnostic.has_errors(),
            "gate decision"
        );
        diagnostic
    }
}

// =============================================================================
//  DEADLINE WINDOW
// =============================================================================

fn check_deadline(frequency: &SubmissionFrequency, submission: &Submission) -> Option<Finding> {
    let close = window_close(frequency, submission.effective_window_date())?;
    let received = submission.received_at;

    (received > close).then(|| {
        Finding::warning(
            FindingScope::Authorization,
            format!(
                "submission received at {} is past the {} deadline ({})",
                received.format("%Y-%m-%d %H:%M"),
                cadence_name(frequency.cadence),
                close.format("%Y-%m-%d %H:%M")
            ),
        )
    })
}

/// The instant the window covering `window_date` closes.
fn window_close(
    frequency: &SubmissionFrequency,
    window_date: chrono::NaiveDate,
) -> Option<chrono::NaiveDateTime> {
    use chrono::Datelike;

    let deadline_time = parse_time(&frequency.deadline.time)?;

    let close_date = match frequency.cadence {
        Cadence::Daily => window_date,
        Cadence::Weekly => {
            let close_day = weekday_of(&frequency.deadline).unwrap_or(Weekday::Sun);
            let from_monday = window_date.weekday().num_days_from_monday() as i64;
            let close_from_monday = close_day.num_days_from_monday() as i64;
            window_date + chrono::Duration::days(close_from_monday - from_monday)
        }
        Cadence::Monthly => {
            // Clamp to the month's last day (deadline 31 in April = 30)
            let mut day = frequency.deadline.day.unwrap_or(31).min(31);
            loop {
                if let Some(date) = window_date.with_day(day) {
                    break date;
                }
                if day == 1 {
                    return None;
                }
                day -= 1;
            }
        }
    };

    Some(close_date.and_time(deadline_time))
}

fn cadence_name(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Daily => "daily",
        Cadence::Weekly => "weekly",
        Cadence::Monthly => "monthly",
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
        // "23:59" closes at the end of that minute
        .map(|t| t.with_second(59).unwrap_or(t))
}

fn weekday_of(deadline: &Deadline) -> Option<Weekday> {
    match deadline.day_of_week.as_deref()?.to_lowercase().as_str() {
        "monday" | "lunes" => Some(Weekday::Mon),
        "tuesday" | "martes" => Some(Weekday::Tue),
        "wednesday" | "miercoles" => Some(Weekday::Wed),
        "thursday" | "jueves" => Some(Weekday::Thu),
        "friday" | "viernes" => Some(Weekday::Fri),
        "saturday" | "sabado" => Some(Weekday::Sat),
        "sunday" | "domingo" => Some(Weekday::Sun),
        _ => None,
    }
}

// =============================================================================
//  CHANNEL CREDENTIALS
// =============================================================================

fn check_credential(sender: &Sender, submission: &Submission) -> Option<Finding> {
    // No credential presented at intake (e.g. the gate-only CLI):
    // the intake adapters that know the credential always attach one.
    if matches!(submission.credential, ChannelCredential::None) {
        return None;
    }

    let deny = |message: String| {
        Some(Finding::error(FindingScope::Authorization, message))
    };

    match submission.channel {
        Channel::Api => {
            let expected = &sender.configurations.api.as_ref()?.api_key;
            match &submission.credential {
                ChannelCredential::ApiKey(presented) if presented == expected => None,
                _ => deny(format!(
                    "api key does not match the configuration of sender '{}'",
                    sender.sender_id
                )),
            }
        }
        Channel::Email => {
            let allowed = &sender.configurations.email.as_ref()?.allowed_senders;
            match &submission.credential {
                ChannelCredential::EmailEnvelope(envelope) if allowed.contains(envelope) => None,
                ChannelCredential::EmailEnvelope(envelope) => deny(format!(
                    "envelope sender '{}' is not in allowed_senders of '{}'",
                    envelope, sender.sender_id
                )),
                _ => deny(format!(
                    "credential presented for '{}' does not fit the email channel",
                    sender.sender_id
                )),
            }
        }
        Channel::Sftp => {
            let expected = &sender.configurations.sftp.as_ref()?.host;
            match &submission.credential {
                ChannelCredential::SftpSourceHost(host) if host == expected => None,
                ChannelCredential::SftpSourceHost(host) => deny(format!(
                    "sftp source host '{}' does not match configured host '{}'",
                    host, expected
                )),
                _ => deny(format!(
                    "credential presented for '{}' does not fit the sftp channel",
                    sender.sender_id
                )),
            }
        }
        // No per-submission credential for local channels
        Channel::Filesystem | Channel::DirectUpload => None,
    }
}
