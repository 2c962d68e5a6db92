mod backoff;
mod classify;

pub use backoff::{BackoffPolicy, BackoffState};
pub use classify::{Classification, classify};

use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;

/// Outcome of a single attempt, reported through the observer side-channel.
///
/// The executor is the only place failures are recorded, so every call site
/// gets uniform failure visibility for free.
#[derive(Debug)]
pub struct AttemptReport<'a> {
    pub operation: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub outcome: AttemptOutcome<'a>,
}

#[derive(Debug)]
pub enum AttemptOutcome<'a> {
    Success,
    Failure {
        classification: Classification,
        error: &'a anyhow::Error,
    },
}

/// Final error returned once the executor gives up on an operation.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempt(s) ({classification:?}): {source}")]
    Failed {
        operation: String,
        attempts: u32,
        classification: Classification,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} cancelled by shutdown")]
    Cancelled { operation: String },
}

impl RetryError {
    pub fn classification(&self) -> Option<&Classification> {
        match self {
            Self::Failed { classification, .. } => Some(classification),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Generic attempt/classify/sleep/retry wrapper used by every remote call.
///
/// Attempts run strictly in sequence: the backoff sleep is fully awaited
/// before the next attempt, and a shutdown signal interrupts the sleep so an
/// in-flight retried operation stops before its next attempt rather than
/// waiting the delay out.
pub struct RetryExecutor {
    policy: BackoffPolicy,
    max_attempts: u32,
    shutdown: watch::Receiver<bool>,
}

impl RetryExecutor {
    pub fn new(policy: BackoffPolicy, max_attempts: u32, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
            shutdown,
        }
    }

    pub async fn execute<T, F, Fut, O>(
        &self,
        operation: &str,
        mut op: F,
        mut observe: O,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        O: FnMut(&AttemptReport<'_>),
    {
        let mut state = BackoffState::new();
        let mut shutdown = self.shutdown.clone();

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => {
                    observe(&AttemptReport {
                        operation,
                        attempt,
                        max_attempts: self.max_attempts,
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(value);
                }
                Err(error) => {
                    let classification = classify(&error);
                    state.record_failure();
                    observe(&AttemptReport {
                        operation,
                        attempt,
                        max_attempts: self.max_attempts,
                        outcome: AttemptOutcome::Failure {
                            classification: classification.clone(),
                            error: &error,
                        },
                    });

                    if !classification.is_retryable() || attempt == self.max_attempts {
                        return Err(RetryError::Failed {
                            operation: operation.to_string(),
                            attempts: attempt,
                            classification,
                            source: error,
                        });
                    }

                    let delay = self.policy.next_delay(&state, &classification);
                    let deadline = tokio::time::Instant::now() + delay;
                    loop {
                        tokio::select! {
                            () = tokio::time::sleep_until(deadline) => break,
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return Err(RetryError::Cancelled {
                                        operation: operation.to_string(),
                                    });
                                }
                                // Watch update that is not a shutdown: keep
                                // waiting out the remaining delay.
                            }
                        }
                    }
                    if *shutdown.borrow() {
                        return Err(RetryError::Cancelled {
                            operation: operation.to_string(),
                        });
                    }
                }
            }
        }

        unreachable!("retry loop always returns within max_attempts")
    }
}

/// Default observer: logs each attempt through `tracing`.
pub fn log_attempt(report: &AttemptReport<'_>) {
    match &report.outcome {
        AttemptOutcome::Success => {
            if report.attempt > 1 {
                tracing::info!(
                    operation = report.operation,
                    attempt = report.attempt,
                    "operation recovered after retries"
                );
            }
        }
        AttemptOutcome::Failure {
            classification,
            error,
        } => {
            tracing::warn!(
                operation = report.operation,
                attempt = report.attempt,
                max_attempts = report.max_attempts,
                classification = ?classification,
                "attempt failed: {error:#}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailApiError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            rate_limit_base: Duration::from_millis(2),
            max: Duration::from_millis(10),
        }
    }

    fn executor(max_attempts: u32) -> (RetryExecutor, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (RetryExecutor::new(fast_policy(), max_attempts, rx), tx)
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let (executor, _tx) = executor(3);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let result = executor
            .execute(
                "noop",
                move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(7)
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_recovers() {
        let (executor, _tx) = executor(3);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let result = executor
            .execute(
                "flaky",
                move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            anyhow::bail!("connection reset by peer");
                        }
                        Ok("recovered")
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(result, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_never_retried() {
        let (executor, _tx) = executor(5);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let err = executor
            .execute(
                "doomed",
                move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(anyhow::Error::new(MailApiError::Status {
                            status: 404,
                            message: "gone".into(),
                        }))
                    }
                },
                |_| {},
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            RetryError::Failed {
                attempts,
                classification,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(classification, Classification::Permanent);
            }
            RetryError::Cancelled { .. } => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn auth_error_is_escalated_not_retried() {
        let (executor, _tx) = executor(5);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let err = executor
            .execute(
                "refresh",
                move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(anyhow::Error::new(MailApiError::Unauthorized {
                            status: 401,
                        }))
                    }
                },
                |_| {},
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.classification(), Some(&Classification::Auth));
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_transient_failure() {
        let (executor, _tx) = executor(3);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let err = executor
            .execute::<(), _, _, _>(
                "down",
                move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("connection refused")
                    }
                },
                |_| {},
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RetryError::Failed { attempts, .. } => assert_eq!(attempts, 3),
            RetryError::Cancelled { .. } => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn observer_sees_every_attempt() {
        let (executor, _tx) = executor(3);
        let reports = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let reports_in = Arc::clone(&reports);
        let failures_in = Arc::clone(&failures);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let _ = executor
            .execute(
                "observed",
                move || {
                    let calls = Arc::clone(&calls_in);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            anyhow::bail!("timed out");
                        }
                        Ok(())
                    }
                },
                move |report| {
                    reports_in.fetch_add(1, Ordering::SeqCst);
                    if matches!(report.outcome, AttemptOutcome::Failure { .. }) {
                        failures_in.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .await;

        assert_eq!(reports.load(Ordering::SeqCst), 2);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_shutdown_watch_update_does_not_cut_backoff_short() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(300),
            rate_limit_base: Duration::from_millis(300),
            max: Duration::from_secs(1),
        };
        let (tx, rx) = watch::channel(false);
        let executor = RetryExecutor::new(policy, 2, rx);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let started = tokio::time::Instant::now();
        let task = tokio::spawn(async move {
            executor
                .execute(
                    "nudged",
                    move || {
                        let calls = Arc::clone(&calls_in);
                        async move {
                            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                                anyhow::bail!("connection reset by peer");
                            }
                            Ok(())
                        }
                    },
                    |_| {},
                )
                .await
        });

        // Mid-backoff, publish a value that is still `false`. The sleep must
        // run to its original deadline before the second attempt.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(false).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // 300ms base minus the 20% jitter floor, with slack for timer grain.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn shutdown_cancels_before_next_attempt() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(60),
            rate_limit_base: Duration::from_secs(60),
            max: Duration::from_secs(120),
        };
        let (tx, rx) = watch::channel(false);
        let executor = RetryExecutor::new(policy, 5, rx);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in = Arc::clone(&calls);
        let task = tokio::spawn(async move {
            executor
                .execute::<(), _, _, _>(
                    "cancelled",
                    move || {
                        let calls = Arc::clone(&calls_in);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            anyhow::bail!("timed out")
                        }
                    },
                    |_| {},
                )
                .await
        });

        // Give the first attempt time to fail and enter its backoff sleep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, RetryError::Cancelled { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
