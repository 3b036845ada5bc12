use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::SupervisionSettings;
use super::error::ConvergeError;
use super::wait::{PollStep, WaitBudget, Waiter};
use super::DesiredFields;

const DEFAULT_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMismatch {
    pub field: String,
    pub expected: Value,
    pub actual: Option<Value>,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(f, "{}: want {}, have {}", self.field, self.expected, actual),
            None => write!(f, "{}: want {}, field missing", self.field, self.expected),
        }
    }
}

/// Every desired field whose live value differs. Keys starting with `/` are
/// resolved as JSON pointers.
pub fn diff_desired(desired: &DesiredFields, current: &Value) -> Vec<FieldMismatch> {
    desired
        .iter()
        .filter_map(|(field, expected)| {
            let actual = lookup_field(current, field);
            if actual == Some(expected) {
                return None;
            }
            Some(FieldMismatch {
                field: field.clone(),
                expected: expected.clone(),
                actual: actual.cloned(),
            })
        })
        .collect()
}

fn lookup_field<'v>(current: &'v Value, field: &str) -> Option<&'v Value> {
    if field.starts_with('/') {
        current.pointer(field)
    } else {
        current.get(field)
    }
}

#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    operation: String,
    budget: WaitBudget,
    grace: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl ConvergencePoller {
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            operation: "convergence".to_string(),
            budget: WaitBudget::Deadline(timeout),
            grace: DEFAULT_GRACE,
            interval: DEFAULT_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            operation: "convergence".to_string(),
            budget: WaitBudget::Attempts(attempts),
            grace: Duration::ZERO,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_settings(settings: &SupervisionSettings, timeout: Duration) -> Self {
        Self::with_deadline(timeout)
            .grace(settings.convergence_grace())
            .interval(settings.convergence_interval())
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn named(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn budget(&self) -> WaitBudget {
        self.budget
    }

    /// Returns the first read that satisfied `desired`. A failed read ends
    /// polling with that error.
    pub async fn poll_until_converged<F, Fut>(
        &self,
        desired: &DesiredFields,
        mut read_current: F,
    ) -> Result<Value, ConvergeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ConvergeError>>,
    {
        let operation = self.operation.as_str();
        Waiter::new(operation, self.budget, self.interval)
            .with_initial_delay(self.grace)
            .with_cancellation(self.cancel.clone())
            .run(|attempt| {
                let read = read_current();
                async move {
                    let current = read.await?;
                    let mismatches = diff_desired(desired, &current);
                    if mismatches.is_empty() {
                        debug!(operation, attempt, "resource converged");
                        return Ok(PollStep::Ready(current));
                    }

                    let observed = mismatches
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ");
                    debug!(operation, attempt, %observed, "resource not converged");
                    Ok(PollStep::Pending(Some(observed)))
                }
            })
            .await
    }
}

pub async fn poll_until_converged<F, Fut>(
    desired: &DesiredFields,
    read_current: F,
    timeout: Duration,
) -> Result<Value, ConvergeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, ConvergeError>>,
{
    ConvergencePoller::with_deadline(timeout)
        .poll_until_converged(desired, read_current)
        .await
}
