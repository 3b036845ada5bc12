use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ManagementClient, RequestMethod};
use super::config::SupervisionSettings;
use super::error::ConvergeError;
use super::wait::{PollStep, WaitBudget, Waiter};
use super::{JobState, TrackedJob};

#[derive(Debug, Default, Deserialize)]
struct JobPayload {
    #[serde(default)]
    state: Option<String>,
    #[serde(default, rename = "TaskState")]
    task_state: Option<String>,
    #[serde(default, rename = "JobState")]
    job_state: Option<String>,
}

impl JobPayload {
    fn state(&self, location: &str) -> Result<JobState, ConvergeError> {
        let label = self
            .state
            .as_deref()
            .or(self.task_state.as_deref())
            .or(self.job_state.as_deref())
            .ok_or_else(|| ConvergeError::decode(location, "job record carries no state"))?;
        JobState::from_label(label)
            .ok_or_else(|| ConvergeError::decode(location, format!("unknown job state `{label}`")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct JobLogPayload {
    #[serde(default, alias = "Messages")]
    messages: Vec<JobLogMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct JobLogMessage {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobLog {
    pub raw: Vec<u8>,
    pub diagnostics: Vec<String>,
}

impl JobLog {
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

pub struct TaskSupervisor<'a, C: ManagementClient + ?Sized> {
    client: &'a C,
    poll_interval: Duration,
    log_segment: String,
    delete_terminal_jobs: bool,
    cancel: CancellationToken,
}

impl<'a, C: ManagementClient + ?Sized> TaskSupervisor<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self::from_settings(client, &SupervisionSettings::default())
    }

    pub fn from_settings(client: &'a C, settings: &SupervisionSettings) -> Self {
        Self {
            client,
            poll_interval: settings.job_poll_interval(),
            log_segment: settings.job_log_segment.clone(),
            delete_terminal_jobs: settings.delete_terminal_jobs,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Polls `location` until the job is terminal or `timeout` has passed
    /// since this call. A failed lookup ends the wait immediately.
    pub async fn wait_for_job(
        &self,
        location: &str,
        timeout: Duration,
    ) -> Result<TrackedJob, ConvergeError> {
        let waiter = Waiter::new(
            format!("job {location}"),
            WaitBudget::Deadline(timeout),
            self.poll_interval,
        )
        .with_cancellation(self.cancel.clone());

        let state = waiter
            .run(|attempt| async move {
                let state = self.read_state(location).await?;
                debug!(%location, %state, attempt, "polled job");
                if state.is_terminal() {
                    Ok(PollStep::Ready(state))
                } else {
                    Ok(PollStep::Pending(Some(state.to_string())))
                }
            })
            .await?;

        let job = TrackedJob {
            location: location.to_string(),
            state,
        };
        if job.is_success() {
            info!(%location, "job completed");
            self.discard(location).await;
            return Ok(job);
        }

        warn!(%location, %state, "job ended without completing");
        let (diagnostics, log_error) = match self.fetch_job_log(location).await {
            Ok(log) => (log.diagnostics, None),
            Err(error) => {
                warn!(%location, %error, "job log unavailable");
                (Vec::new(), Some(error.to_string()))
            }
        };
        self.discard(location).await;

        Err(ConvergeError::JobFailed {
            location: job.location,
            state,
            diagnostics,
            log_error,
        })
    }

    pub async fn fetch_job_log(&self, location: &str) -> Result<JobLog, ConvergeError> {
        let path = format!("{}/{}", location.trim_end_matches('/'), self.log_segment);
        let response = self.client.get(&path).await?;
        if response.status != 200 {
            return Err(ConvergeError::unexpected_status(
                RequestMethod::Get,
                &path,
                &response,
            ));
        }

        let payload: JobLogPayload = response.json(&path)?;
        let diagnostics = payload
            .messages
            .into_iter()
            .filter_map(|entry| entry.message)
            .filter(|message| message.contains("Error"))
            .collect();
        Ok(JobLog {
            raw: response.body,
            diagnostics,
        })
    }

    async fn read_state(&self, location: &str) -> Result<JobState, ConvergeError> {
        let response = self.client.get(location).await?;
        if response.status != 200 {
            return Err(ConvergeError::unexpected_status(
                RequestMethod::Get,
                location,
                &response,
            ));
        }
        let payload: JobPayload = response.json(location)?;
        payload.state(location)
    }

    async fn discard(&self, location: &str) {
        if !self.delete_terminal_jobs {
            return;
        }
        match self.client.delete(location).await {
            Ok(response) if response.is_success() => debug!(%location, "deleted job record"),
            Ok(response) => warn!(%location, status = response.status, "could not delete job record"),
            Err(error) => warn!(%location, %error, "could not delete job record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::convergence_core::test_support::{json_response, run_async, ScriptedClient};
    use serde_json::json;
    use tokio::time::Instant;

    const JOB: &str = "/redfish/v1/TaskService/Tasks/JID_1";
    const JOB_LOG: &str = "/redfish/v1/TaskService/Tasks/JID_1/Log";

    fn job(state: &str) -> Result<crate::ClientResponse, ConvergeError> {
        json_response(200, json!({ "Id": "JID_1", "TaskState": state }))
    }

    #[test]
    fn completed_job_is_success() {
        run_async(async {
            let client = ScriptedClient::new().on(RequestMethod::Get, JOB, vec![job("Completed")]);
            let tracked = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect("completed");
            assert_eq!(tracked.state, JobState::Completed);
            assert!(tracked.is_success());
            assert!(client.calls_to(RequestMethod::Get, JOB_LOG).is_empty());
        });
    }

    #[test]
    fn every_failure_terminal_state_is_job_failed() {
        for state in JobState::ALL
            .into_iter()
            .filter(|state| state.is_terminal() && !state.is_success())
        {
            run_async(async move {
                let client = ScriptedClient::new()
                    .on(RequestMethod::Get, JOB, vec![job(state.as_str())])
                    .on(
                        RequestMethod::Get,
                        JOB_LOG,
                        vec![json_response(200, json!({ "messages": [] }))],
                    );
                let error = TaskSupervisor::new(&client)
                    .wait_for_job(JOB, Duration::from_secs(60))
                    .await
                    .expect_err("failure terminal");
                assert!(
                    matches!(error, ConvergeError::JobFailed { state: failed, .. } if failed == state),
                    "{state}: {error}"
                );
            });
        }
    }

    #[test]
    fn running_then_completed_succeeds_between_polls() {
        run_async(async {
            let started = Instant::now();
            let client = ScriptedClient::new().on(
                RequestMethod::Get,
                JOB,
                vec![job("Running"), job("Running"), job("Completed")],
            );

            let tracked = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(20))
                .await
                .expect("completed");

            assert!(tracked.is_success());
            let elapsed = started.elapsed().as_secs();
            assert!((10..=15).contains(&elapsed), "elapsed {elapsed}s");
            let polled_at = client
                .calls_to(RequestMethod::Get, JOB)
                .into_iter()
                .map(|call| call.at.as_secs())
                .collect::<Vec<_>>();
            assert_eq!(polled_at, vec![0, 5, 10]);
        });
    }

    #[test]
    fn job_stuck_running_times_out_at_the_deadline() {
        run_async(async {
            let started = Instant::now();
            let client = ScriptedClient::new().on(RequestMethod::Get, JOB, vec![job("Running")]);

            let error = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(12))
                .await
                .expect_err("never finishes");

            let elapsed = started.elapsed().as_secs();
            assert!((12..=17).contains(&elapsed), "elapsed {elapsed}s");
            assert_eq!(
                error,
                ConvergeError::Timeout {
                    operation: format!("job {JOB}"),
                    budget: WaitBudget::Deadline(Duration::from_secs(12)),
                    last_observed: Some("Running".to_string()),
                }
            );
        });
    }

    #[test]
    fn failed_lookup_is_not_retried() {
        run_async(async {
            let client = ScriptedClient::new().on(
                RequestMethod::Get,
                JOB,
                vec![
                    job("Running"),
                    Err(ConvergeError::Transport("connection reset".to_string())),
                    job("Completed"),
                ],
            );

            let error = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect_err("transport failure");
            assert!(error.is_transport());
            assert_eq!(client.calls_to(RequestMethod::Get, JOB).len(), 2);
        });
    }

    #[test]
    fn missing_job_is_unexpected_status() {
        run_async(async {
            let client = ScriptedClient::new();
            let error = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect_err("404");
            assert!(matches!(
                error,
                ConvergeError::UnexpectedStatus { status: 404, .. }
            ));
        });
    }

    #[test]
    fn unknown_state_is_decode_error() {
        run_async(async {
            let client = ScriptedClient::new().on(RequestMethod::Get, JOB, vec![job("Exploded")]);
            let error = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect_err("unknown state");
            assert!(matches!(error, ConvergeError::Decode { .. }));
        });
    }

    #[test]
    fn failed_job_carries_error_messages_from_log() {
        run_async(async {
            let client = ScriptedClient::new()
                .on(
                    RequestMethod::Get,
                    JOB,
                    vec![json_response(200, json!({ "JobState": "Exception" }))],
                )
                .on(
                    RequestMethod::Get,
                    JOB_LOG,
                    vec![json_response(
                        200,
                        json!({
                            "Messages": [
                                { "Message": "Job started" },
                                { "Message": "Error: physical disk 0:1:3 is not ready" },
                                { "Message": "Error: operation aborted" }
                            ]
                        }),
                    )],
                );

            let error = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect_err("exception");
            assert_eq!(
                error,
                ConvergeError::JobFailed {
                    location: JOB.to_string(),
                    state: JobState::Exception,
                    diagnostics: vec![
                        "Error: physical disk 0:1:3 is not ready".to_string(),
                        "Error: operation aborted".to_string(),
                    ],
                    log_error: None,
                }
            );
        });
    }

    #[test]
    fn log_failure_does_not_mask_job_failure() {
        run_async(async {
            let client = ScriptedClient::new().on(RequestMethod::Get, JOB, vec![job("Killed")]);
            let error = TaskSupervisor::new(&client)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect_err("killed");
            match error {
                ConvergeError::JobFailed {
                    state,
                    diagnostics,
                    log_error,
                    ..
                } => {
                    assert_eq!(state, JobState::Killed);
                    assert!(diagnostics.is_empty());
                    assert!(log_error.is_some_and(|message| message.contains("404")));
                }
                other => panic!("unexpected error: {other}"),
            }
        });
    }

    #[test]
    fn fetch_job_log_keeps_raw_body() {
        run_async(async {
            let client = ScriptedClient::new().on(
                RequestMethod::Get,
                JOB_LOG,
                vec![json_response(200, json!({ "messages": [{ "message": "ok" }] }))],
            );
            let log = TaskSupervisor::new(&client)
                .fetch_job_log(&format!("{JOB}/"))
                .await
                .expect("log");
            assert!(log.diagnostics.is_empty());
            assert!(log.raw_text().contains("\"ok\""));
        });
    }

    #[test]
    fn terminal_job_is_deleted_when_configured() {
        run_async(async {
            let settings = SupervisionSettings {
                delete_terminal_jobs: true,
                ..SupervisionSettings::default()
            };
            let client = ScriptedClient::new()
                .on(RequestMethod::Get, JOB, vec![job("Completed")])
                .on(RequestMethod::Delete, JOB, vec![Ok(crate::ClientResponse::new(200))]);

            TaskSupervisor::from_settings(&client, &settings)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect("completed");
            assert_eq!(client.calls_to(RequestMethod::Delete, JOB).len(), 1);
        });
    }

    #[test]
    fn cancellation_stops_polling() {
        run_async(async {
            let client = ScriptedClient::new().on(RequestMethod::Get, JOB, vec![job("Running")]);
            let token = CancellationToken::new();
            token.cancel();
            let error = TaskSupervisor::new(&client)
                .with_cancellation(token)
                .wait_for_job(JOB, Duration::from_secs(60))
                .await
                .expect_err("cancelled");
            assert!(matches!(error, ConvergeError::Cancelled { .. }));
            assert!(client.calls().is_empty());
        });
    }
}
