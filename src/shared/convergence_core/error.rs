use thiserror::Error;

use super::client::{ClientResponse, RequestMethod};
use super::wait::WaitBudget;
use super::JobState;

const STATUS_BODY_PREVIEW_CHARS: usize = 512;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConvergeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status} for {method} {path}: {body}")]
    UnexpectedStatus {
        method: RequestMethod,
        path: String,
        status: u16,
        body: String,
    },

    #[error("job `{location}` ended in state {state}{}", render_job_diagnostics(.diagnostics, .log_error))]
    JobFailed {
        location: String,
        state: JobState,
        diagnostics: Vec<String>,
        log_error: Option<String>,
    },

    #[error("{operation} did not finish within {budget}{}", render_last_observed(.last_observed))]
    Timeout {
        operation: String,
        budget: WaitBudget,
        last_observed: Option<String>,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("could not decode {context}: {message}")]
    Decode { context: String, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ConvergeError {
    pub(crate) fn unexpected_status(
        method: RequestMethod,
        path: &str,
        response: &ClientResponse,
    ) -> Self {
        let body = response.body_text();
        ConvergeError::UnexpectedStatus {
            method,
            path: path.to_string(),
            status: response.status,
            body: body.chars().take(STATUS_BODY_PREVIEW_CHARS).collect(),
        }
    }

    pub(crate) fn decode(context: impl Into<String>, error: impl ToString) -> Self {
        ConvergeError::Decode {
            context: context.into(),
            message: error.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ConvergeError::Transport(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ConvergeError::Timeout { .. })
    }
}

impl From<reqwest::Error> for ConvergeError {
    fn from(error: reqwest::Error) -> Self {
        ConvergeError::Transport(error.to_string())
    }
}

fn render_job_diagnostics(diagnostics: &[String], log_error: &Option<String>) -> String {
    let mut rendered = String::new();
    if !diagnostics.is_empty() {
        rendered.push_str(": ");
        rendered.push_str(&diagnostics.join("; "));
    }
    if let Some(log_error) = log_error {
        rendered.push_str(&format!(" (job log unavailable: {log_error})"));
    }
    rendered
}

fn render_last_observed(last_observed: &Option<String>) -> String {
    last_observed
        .as_deref()
        .map(|observed| format!(" (last observed: {observed})"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("volume request names no disk groups")]
    NoDiskGroups,

    #[error("invalid drive location `{descriptor}`: {reason}")]
    InvalidLocation { descriptor: String, reason: String },

    #[error("disk group {group} does not name any drive slot")]
    EmptyGroup { group: usize },

    #[error("slot {slot} in disk group {group} does not match any drive on the controller")]
    UnresolvedSlot { group: usize, slot: String },

    #[error("RAID type `{raid_type}` is not supported by the controller (supported: {})", .supported.join(", "))]
    UnsupportedRaidType {
        raid_type: String,
        supported: Vec<String>,
    },

    #[error("cannot select a stripe size list for {raid_type}: {reason}")]
    MediaTypeUndetermined { raid_type: String, reason: String },

    #[error("stripe size {requested} is not allowed for {raid_type} on {media} drives (allowed: {})", join_sizes(.allowed))]
    StripeSizeNotAllowed {
        raid_type: String,
        requested: u64,
        media: String,
        allowed: Vec<u64>,
    },

    #[error("{raid_type} needs {} disk groups, got {actual}", render_span_range(.minimum, .maximum))]
    SpanCountOutOfRange {
        raid_type: String,
        minimum: u32,
        maximum: u32,
        actual: usize,
    },

    #[error("{raid_type} needs exactly one disk group, got {actual}")]
    SingleGroupRequired { raid_type: String, actual: usize },

    #[error("disk group {group} has {actual} drives, {raid_type} needs at least {minimum} per group")]
    TooFewDrivesInGroup {
        raid_type: String,
        group: usize,
        minimum: u32,
        actual: usize,
    },

    #[error("controller `{model}` only creates volumes over full disk groups; drop the explicit capacity")]
    CapacityNotSupported { model: String },
}

fn render_span_range(minimum: &u32, maximum: &u32) -> String {
    if *maximum == 0 {
        format!("at least {minimum}")
    } else {
        format!("between {minimum} and {maximum}")
    }
}

fn join_sizes(sizes: &[u64]) -> String {
    if sizes.is_empty() {
        return "none".to_string();
    }
    sizes
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn job_failure_message_keeps_primary_state_when_log_missing() {
        let error = ConvergeError::JobFailed {
            location: "/jobs/JID_9".to_string(),
            state: JobState::Exception,
            diagnostics: Vec::new(),
            log_error: Some("unexpected status 404".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "job `/jobs/JID_9` ended in state Exception (job log unavailable: unexpected status 404)"
        );
    }

    #[test]
    fn job_failure_message_lists_diagnostics() {
        let error = ConvergeError::JobFailed {
            location: "/jobs/JID_9".to_string(),
            state: JobState::Killed,
            diagnostics: vec!["Error: disk busy".to_string(), "Error: retry".to_string()],
            log_error: None,
        };
        assert!(error
            .to_string()
            .ends_with("state Killed: Error: disk busy; Error: retry"));
    }

    #[test]
    fn timeout_is_distinct_from_job_failure() {
        let error = ConvergeError::Timeout {
            operation: "job /jobs/JID_1".to_string(),
            budget: WaitBudget::Deadline(Duration::from_secs(12)),
            last_observed: Some("Running".to_string()),
        };
        assert!(error.is_timeout());
        assert_eq!(
            error.to_string(),
            "job /jobs/JID_1 did not finish within 12s (last observed: Running)"
        );
    }

    #[test]
    fn stripe_size_message_names_the_constraint() {
        let error = ValidationError::StripeSizeNotAllowed {
            raid_type: "RAID1".to_string(),
            requested: 256,
            media: "any".to_string(),
            allowed: vec![64, 128],
        };
        assert_eq!(
            error.to_string(),
            "stripe size 256 is not allowed for RAID1 on any drives (allowed: 64, 128)"
        );
    }

    #[test]
    fn open_ended_span_range_reads_as_a_floor() {
        let bounded = ValidationError::SpanCountOutOfRange {
            raid_type: "RAID10".to_string(),
            minimum: 2,
            maximum: 8,
            actual: 1,
        };
        assert_eq!(bounded.to_string(), "RAID10 needs between 2 and 8 disk groups, got 1");

        let floor_only = ValidationError::SpanCountOutOfRange {
            raid_type: "RAID50".to_string(),
            minimum: 2,
            maximum: 0,
            actual: 1,
        };
        assert_eq!(floor_only.to_string(), "RAID50 needs at least 2 disk groups, got 1");
    }
}
