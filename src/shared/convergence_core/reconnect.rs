use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ManagementClient, SessionConnector};
use super::config::SupervisionSettings;
use super::error::ConvergeError;
use super::wait::{PollStep, WaitBudget, Waiter};

#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    retry_interval: Duration,
    warm_up: Duration,
    liveness_path: String,
    cancel: CancellationToken,
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::from_settings(&SupervisionSettings::default())
    }
}

impl ReconnectSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &SupervisionSettings) -> Self {
        Self {
            retry_interval: settings.reconnect_retry(),
            warm_up: settings.warm_up(),
            liveness_path: settings.liveness_path.clone(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn with_liveness_path(mut self, liveness_path: impl Into<String>) -> Self {
        self.liveness_path = liveness_path.into();
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Keeps opening sessions until one succeeds or `total_timeout` runs
    /// out. Every failure, whatever its kind, is logged and retried.
    pub async fn reconnect_with_retry<S>(
        &self,
        connector: &S,
        total_timeout: Duration,
    ) -> Result<S::Session, ConvergeError>
    where
        S: SessionConnector + ?Sized,
    {
        let target = connector.target();
        Waiter::new(
            format!("reconnect to {target}"),
            WaitBudget::Deadline(total_timeout),
            self.retry_interval,
        )
        .with_cancellation(self.cancel.clone())
        .run(|attempt| async move {
            match connector.connect().await {
                Ok(session) => {
                    info!(%target, attempt, "session re-established");
                    Ok(PollStep::Ready(session))
                }
                Err(error) => {
                    warn!(%target, attempt, %error, "reconnect attempt failed");
                    Ok(PollStep::Pending(Some(error.to_string())))
                }
            }
        })
        .await
    }

    /// Sleeps through the warm-up, then polls the liveness path until it
    /// answers 2xx. `timeout` starts after the warm-up.
    pub async fn await_ready<C>(
        &self,
        client: &C,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<(), ConvergeError>
    where
        C: ManagementClient + ?Sized,
    {
        let waiter = Waiter::new(
            "readiness check",
            WaitBudget::Deadline(timeout),
            poll_interval,
        )
        .with_cancellation(self.cancel.clone());

        if !self.warm_up.is_zero() {
            debug!(warm_up_secs = self.warm_up.as_secs(), "waiting for target to settle");
            waiter.pause(self.warm_up).await?;
        }

        let path = self.liveness_path.as_str();
        waiter
            .run(|attempt| async move {
                match client.get(path).await {
                    Ok(response) if response.is_success() => {
                        info!(attempt, "target is ready");
                        Ok(PollStep::Ready(()))
                    }
                    Ok(response) => {
                        debug!(attempt, status = response.status, "target not ready");
                        Ok(PollStep::Pending(Some(format!("status {}", response.status))))
                    }
                    Err(error) => {
                        debug!(attempt, %error, "target not reachable");
                        Ok(PollStep::Pending(Some(error.to_string())))
                    }
                }
            })
            .await
    }
}
