use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::error::ConvergeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBudget {
    Deadline(Duration),
    Attempts(u32),
}

impl fmt::Display for WaitBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitBudget::Deadline(duration) => {
                if duration.subsec_millis() == 0 {
                    write!(f, "{}s", duration.as_secs())
                } else {
                    write!(f, "{}ms", duration.as_millis())
                }
            }
            WaitBudget::Attempts(1) => f.write_str("1 attempt"),
            WaitBudget::Attempts(count) => write!(f, "{count} attempts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollStep<T> {
    Ready(T),
    Pending(Option<String>),
}

#[derive(Debug, Clone)]
pub struct Waiter {
    operation: String,
    budget: WaitBudget,
    interval: Duration,
    initial_delay: Duration,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(operation: impl Into<String>, budget: WaitBudget, interval: Duration) -> Self {
        Self {
            operation: operation.into(),
            budget,
            interval,
            initial_delay: Duration::ZERO,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn budget(&self) -> WaitBudget {
        self.budget
    }

    /// Runs at least one attempt. Attempt numbers start at 1.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, ConvergeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<PollStep<T>, ConvergeError>>,
    {
        let started = Instant::now();

        if !self.initial_delay.is_zero() {
            self.pause(self.initial_delay).await?;
        }

        let mut attempt_number = 0u32;
        loop {
            attempt_number += 1;
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                step = attempt(attempt_number) => step?,
            };

            let last_observed = match step {
                PollStep::Ready(value) => return Ok(value),
                PollStep::Pending(observed) => observed,
            };
            trace!(
                operation = %self.operation,
                attempt = attempt_number,
                observed = last_observed.as_deref().unwrap_or("-"),
                "not there yet"
            );

            let pause = match self.budget {
                WaitBudget::Deadline(duration) => {
                    let remaining = (started + duration).saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(self.timed_out(last_observed));
                    }
                    self.interval.min(remaining)
                }
                WaitBudget::Attempts(max_attempts) => {
                    if attempt_number >= max_attempts {
                        return Err(self.timed_out(last_observed));
                    }
                    self.interval
                }
            };
            self.pause(pause).await?;
        }
    }

    pub(crate) async fn pause(&self, duration: Duration) -> Result<(), ConvergeError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn cancelled(&self) -> ConvergeError {
        ConvergeError::Cancelled {
            operation: self.operation.clone(),
        }
    }

    fn timed_out(&self, last_observed: Option<String>) -> ConvergeError {
        ConvergeError::Timeout {
            operation: self.operation.clone(),
            budget: self.budget,
            last_observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::convergence_core::test_support::run_async;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn budget_renders_for_messages() {
        assert_eq!(WaitBudget::Deadline(Duration::from_secs(600)).to_string(), "600s");
        assert_eq!(WaitBudget::Deadline(Duration::from_millis(1500)).to_string(), "1500ms");
        assert_eq!(WaitBudget::Attempts(20).to_string(), "20 attempts");
        assert_eq!(WaitBudget::Attempts(1).to_string(), "1 attempt");
    }

    #[test]
    fn deadline_clips_the_last_sleep() {
        run_async(async {
            let started = Instant::now();
            let attempts_at = std::sync::Mutex::new(Vec::new());
            let waiter = Waiter::new(
                "clip",
                WaitBudget::Deadline(Duration::from_secs(12)),
                Duration::from_secs(5),
            );

            let error = waiter
                .run(|_| {
                    attempts_at
                        .lock()
                        .expect("attempts lock")
                        .push(started.elapsed().as_secs());
                    async { Ok::<PollStep<()>, ConvergeError>(PollStep::Pending(None)) }
                })
                .await
                .expect_err("never ready");

            assert!(error.is_timeout());
            assert_eq!(
                *attempts_at.lock().expect("attempts lock"),
                vec![0, 5, 10, 12]
            );
            assert_eq!(started.elapsed().as_secs(), 12);
        });
    }

    #[test]
    fn attempt_budget_counts_attempts_not_time() {
        run_async(async {
            let calls = AtomicU32::new(0);
            let waiter = Waiter::new("media", WaitBudget::Attempts(3), Duration::from_secs(1));

            let error = waiter
                .run(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<PollStep<()>, ConvergeError>(PollStep::Pending(Some("no".into()))) }
                })
                .await
                .expect_err("never ready");

            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(
                error,
                ConvergeError::Timeout {
                    operation: "media".to_string(),
                    budget: WaitBudget::Attempts(3),
                    last_observed: Some("no".to_string()),
                }
            );
        });
    }

    #[test]
    fn attempt_error_stops_the_loop() {
        run_async(async {
            let calls = AtomicU32::new(0);
            let waiter = Waiter::new(
                "lookup",
                WaitBudget::Deadline(Duration::from_secs(60)),
                Duration::from_secs(5),
            );

            let error = waiter
                .run(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<PollStep<()>, ConvergeError>(ConvergeError::Transport(
                            "connection reset".into(),
                        ))
                    }
                })
                .await
                .expect_err("lookup failure");

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(error.is_transport());
        });
    }

    #[test]
    fn initial_delay_counts_against_the_deadline() {
        run_async(async {
            let started = Instant::now();
            let waiter = Waiter::new(
                "grace",
                WaitBudget::Deadline(Duration::from_secs(10)),
                Duration::from_secs(5),
            )
            .with_initial_delay(Duration::from_secs(3));

            let first_attempt_at = waiter
                .run(|_| {
                    let elapsed = started.elapsed();
                    async move { Ok::<_, ConvergeError>(PollStep::Ready(elapsed)) }
                })
                .await
                .expect("ready");

            assert_eq!(first_attempt_at.as_secs(), 3);
        });
    }

    #[test]
    fn cancellation_aborts_a_sleeping_waiter() {
        run_async(async {
            let token = CancellationToken::new();
            let waiter = Waiter::new(
                "cancellable",
                WaitBudget::Deadline(Duration::from_secs(600)),
                Duration::from_secs(5),
            )
            .with_cancellation(token.clone());

            let canceller = {
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(7)).await;
                    token.cancel();
                })
            };

            let started = Instant::now();
            let error = waiter
                .run(|_| async { Ok::<PollStep<()>, ConvergeError>(PollStep::Pending(None)) })
                .await
                .expect_err("cancelled");
            canceller.await.expect("canceller task");

            assert_eq!(
                error,
                ConvergeError::Cancelled {
                    operation: "cancellable".to_string()
                }
            );
            assert_eq!(started.elapsed().as_secs(), 7);
        });
    }
}
