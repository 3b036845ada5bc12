use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod capability;
pub mod client;
pub mod config;
pub mod disk_group;
pub mod endpoint_lock;
pub mod error;
pub mod poller;
pub mod reconnect;
pub mod service;
pub mod task;
pub mod wait;

#[cfg(test)]
mod test_support;

use client::{ClientRequest, ClientResponse, RequestMethod};
use error::ConvergeError;

pub(crate) const DEFAULT_CHANGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Desired field values keyed by property name. Keys starting with `/` are
/// JSON pointers into nested objects.
pub type DesiredFields = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    New,
    Starting,
    Running,
    Pending,
    Suspended,
    Interrupted,
    Exception,
    Completed,
    Killed,
    Cancelled,
    Service,
}

impl JobState {
    pub const ALL: [JobState; 11] = [
        JobState::New,
        JobState::Starting,
        JobState::Running,
        JobState::Pending,
        JobState::Suspended,
        JobState::Interrupted,
        JobState::Exception,
        JobState::Completed,
        JobState::Killed,
        JobState::Cancelled,
        JobState::Service,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(label))
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed
                | JobState::Exception
                | JobState::Cancelled
                | JobState::Killed
                | JobState::Interrupted
                | JobState::Suspended
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, JobState::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::New => "New",
            JobState::Starting => "Starting",
            JobState::Running => "Running",
            JobState::Pending => "Pending",
            JobState::Suspended => "Suspended",
            JobState::Interrupted => "Interrupted",
            JobState::Exception => "Exception",
            JobState::Completed => "Completed",
            JobState::Killed => "Killed",
            JobState::Cancelled => "Cancelled",
            JobState::Service => "Service",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedJob {
    pub location: String,
    pub state: JobState,
}

impl TrackedJob {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionSignal {
    Tracked { location: String },
    Untracked,
}

impl CompletionSignal {
    /// A `202 Accepted` carrying a `Location` header is a tracked job; any
    /// other accepted status completed synchronously or silently.
    pub fn from_response(
        method: RequestMethod,
        path: &str,
        response: &ClientResponse,
    ) -> Result<Self, ConvergeError> {
        match response.status {
            202 => Ok(response
                .location()
                .map(str::trim)
                .filter(|location| !location.is_empty())
                .map(|location| CompletionSignal::Tracked {
                    location: location.to_string(),
                })
                .unwrap_or(CompletionSignal::Untracked)),
            200 | 201 | 204 => Ok(CompletionSignal::Untracked),
            _ => Err(ConvergeError::unexpected_status(method, path, response)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    pub target: String,
    pub category: String,
    pub method: RequestMethod,
    pub path: String,
    pub payload: Option<Value>,
    pub desired: DesiredFields,
    pub read_path: Option<String>,
    pub timeout: Duration,
}

impl ChangeRequest {
    pub fn new(
        target: impl Into<String>,
        category: impl Into<String>,
        method: RequestMethod,
        path: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            category: category.into(),
            method,
            path: path.into(),
            payload: None,
            desired: DesiredFields::new(),
            read_path: None,
            timeout: DEFAULT_CHANGE_TIMEOUT,
        }
    }

    pub fn patch(
        target: impl Into<String>,
        category: impl Into<String>,
        path: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(target, category, RequestMethod::Patch, path).with_payload(payload)
    }

    pub fn post(
        target: impl Into<String>,
        category: impl Into<String>,
        path: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(target, category, RequestMethod::Post, path).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn desire(mut self, field: impl Into<String>, value: Value) -> Self {
        self.desired.insert(field.into(), value);
        self
    }

    pub fn read_back_from(mut self, path: impl Into<String>) -> Self {
        self.read_path = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn read_path(&self) -> &str {
        self.read_path.as_deref().unwrap_or(&self.path)
    }

    pub(crate) fn to_client_request(&self) -> ClientRequest {
        ClientRequest {
            method: self.method,
            path: self.path.clone(),
            body: self.payload.clone(),
            headers: Vec::new(),
        }
    }
}
