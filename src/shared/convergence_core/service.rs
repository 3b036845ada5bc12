use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::client::{read_json, ClientRequest, ManagementClient, RequestMethod, SessionConnector};
use super::config::SupervisionSettings;
use super::endpoint_lock::{EndpointLockRegistry, LockKey};
use super::error::ConvergeError;
use super::poller::ConvergencePoller;
use super::reconnect::ReconnectSupervisor;
use super::task::TaskSupervisor;
use super::{ChangeRequest, CompletionSignal, DesiredFields, TrackedJob};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    Job(TrackedJob),
    Converged { resource: Value },
    Accepted,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangeOutcome {
    pub operation_id: Uuid,
    pub target: String,
    pub completion: Completion,
    pub finished_at: DateTime<Utc>,
}

pub struct ConvergenceService<'a> {
    locks: &'a EndpointLockRegistry,
    settings: SupervisionSettings,
    cancel: CancellationToken,
}

impl<'a> ConvergenceService<'a> {
    pub fn new(locks: &'a EndpointLockRegistry, settings: SupervisionSettings) -> Self {
        Self {
            locks,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &SupervisionSettings {
        &self.settings
    }

    pub async fn apply_change<C>(
        &self,
        client: &C,
        request: &ChangeRequest,
    ) -> Result<ChangeOutcome, ConvergeError>
    where
        C: ManagementClient + ?Sized,
    {
        let operation_id = Uuid::new_v4();
        let span = info_span!(
            "apply_change",
            %operation_id,
            target = %request.target,
            category = %request.category,
            path = %request.path
        );
        async {
            let _guard = self
                .locks
                .acquire(LockKey::new(&request.target, &request.category))
                .await;
            let completion = self
                .submit_and_wait(client, request, request.to_client_request())
                .await?;
            Ok::<_, ConvergeError>(self.outcome(operation_id, request, completion))
        }
        .instrument(span)
        .await
    }

    /// Reads the current ETag under the lock and submits the change as a
    /// PATCH guarded by `If-Match`.
    pub async fn patch_with_etag<C>(
        &self,
        client: &C,
        request: &ChangeRequest,
    ) -> Result<ChangeOutcome, ConvergeError>
    where
        C: ManagementClient + ?Sized,
    {
        let operation_id = Uuid::new_v4();
        let span = info_span!(
            "patch_with_etag",
            %operation_id,
            target = %request.target,
            category = %request.category,
            path = %request.path
        );
        async {
            let _guard = self
                .locks
                .acquire(LockKey::new(&request.target, &request.category))
                .await;

            let current = client.get(&request.path).await?;
            if current.status != 200 {
                return Err(ConvergeError::unexpected_status(
                    RequestMethod::Get,
                    &request.path,
                    &current,
                ));
            }

            let mut submit = request.to_client_request();
            submit.method = RequestMethod::Patch;
            match current.etag() {
                Some(etag) => submit = submit.with_header("If-Match", etag),
                None => debug!("resource has no ETag, patching unguarded"),
            }

            let completion = self.submit_and_wait(client, request, submit).await?;
            Ok(self.outcome(operation_id, request, completion))
        }
        .instrument(span)
        .await
    }

    /// Runs a change that drops connectivity, then opens a new session and
    /// waits for the target to answer again. The lock for the request's own
    /// category is held until the target is ready.
    pub async fn run_disruptive<C, S>(
        &self,
        client: &C,
        connector: &S,
        request: &ChangeRequest,
    ) -> Result<(ChangeOutcome, S::Session), ConvergeError>
    where
        C: ManagementClient + ?Sized,
        S: SessionConnector + ?Sized,
        S::Session: ManagementClient,
    {
        let operation_id = Uuid::new_v4();
        let span = info_span!(
            "run_disruptive",
            %operation_id,
            target = %request.target,
            category = %request.category,
            path = %request.path
        );
        async {
            let _guard = self
                .locks
                .acquire(LockKey::new(&request.target, &request.category))
                .await;
            let completion = self
                .submit_and_wait(client, request, request.to_client_request())
                .await?;

            let reconnect = ReconnectSupervisor::from_settings(&self.settings)
                .with_cancellation(self.cancel.clone());
            let session = reconnect
                .reconnect_with_retry(connector, self.settings.reconnect_timeout())
                .await?;
            reconnect
                .await_ready(
                    &session,
                    self.settings.readiness_interval(),
                    self.settings.readiness_timeout(),
                )
                .await?;

            Ok::<_, ConvergeError>((self.outcome(operation_id, request, completion), session))
        }
        .instrument(span)
        .await
    }

    pub async fn await_completion<C>(
        &self,
        client: &C,
        request: &ChangeRequest,
        signal: &CompletionSignal,
    ) -> Result<Completion, ConvergeError>
    where
        C: ManagementClient + ?Sized,
    {
        match signal {
            CompletionSignal::Tracked { location } => {
                let job = TaskSupervisor::from_settings(client, &self.settings)
                    .with_cancellation(self.cancel.clone())
                    .wait_for_job(location, request.timeout)
                    .await?;
                Ok(Completion::Job(job))
            }
            CompletionSignal::Untracked if request.desired.is_empty() => {
                debug!("untracked change with nothing to compare");
                Ok(Completion::Accepted)
            }
            CompletionSignal::Untracked => {
                let read_path = request.read_path();
                let resource = ConvergencePoller::from_settings(&self.settings, request.timeout)
                    .named(format!("convergence of {read_path}"))
                    .with_cancellation(self.cancel.clone())
                    .poll_until_converged(&request.desired, move || read_json(client, read_path))
                    .await?;
                Ok(Completion::Converged { resource })
            }
        }
    }

    /// Polls a virtual media resource until it reports `Inserted: true`,
    /// using the attempt budget from the settings.
    pub async fn confirm_media_inserted<C>(
        &self,
        client: &C,
        media_path: &str,
    ) -> Result<Value, ConvergeError>
    where
        C: ManagementClient + ?Sized,
    {
        let mut desired = DesiredFields::new();
        desired.insert("Inserted".to_string(), json!(true));
        ConvergencePoller::with_attempts(
            self.settings.media_mount_attempts,
            self.settings.media_mount_interval(),
        )
        .named(format!("media mount at {media_path}"))
        .with_cancellation(self.cancel.clone())
        .poll_until_converged(&desired, move || read_json(client, media_path))
        .await
    }

    async fn submit_and_wait<C>(
        &self,
        client: &C,
        request: &ChangeRequest,
        submit: ClientRequest,
    ) -> Result<Completion, ConvergeError>
    where
        C: ManagementClient + ?Sized,
    {
        let method = submit.method;
        let response = client.send(submit).await?;
        let signal = CompletionSignal::from_response(method, &request.path, &response)?;
        info!(status = response.status, ?signal, "change submitted");
        self.await_completion(client, request, &signal).await
    }

    fn outcome(
        &self,
        operation_id: Uuid,
        request: &ChangeRequest,
        completion: Completion,
    ) -> ChangeOutcome {
        info!(%operation_id, "change finished");
        ChangeOutcome {
            operation_id,
            target: request.target.clone(),
            completion,
            finished_at: Utc::now(),
        }
    }
}
