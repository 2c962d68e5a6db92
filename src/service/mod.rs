mod control;

pub use control::{ControlSignal, ServiceHandle, ServiceState, StatusSnapshot};

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::auth::TokenManager;
use crate::config::{Config, ConfigHandle};
use crate::gmail::MailSource;
use crate::ledger::Ledger;
use crate::net::NetworkMonitor;
use crate::notes::{Note, NoteSink};
use crate::notify::{Notifier, Severity};
use crate::retry::{BackoffPolicy, RetryExecutor, log_attempt};
use crate::template;

use control::StatusBoard;

const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// How long an in-flight cycle may keep running after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How one poll cycle ended. Early ends are contained to the cycle; the next
/// timer tick tries again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { processed: usize, failed: usize },
    /// Network monitor reported offline; sleep the short retry interval.
    Offline,
    /// No valid credential this cycle; fetch and process were skipped.
    AuthSkipped,
    /// Listing messages failed even after retries.
    FetchFailed,
}

/// The orchestrator: owns every collaborator and drives the poll loop.
///
/// Exactly one cycle is ever active. All waits are `tokio::time` sleeps raced
/// against the control channel, so pause/resume/reload/shutdown interrupt the
/// current wait instead of being queued behind it.
pub struct Service {
    config: ConfigHandle,
    ledger: Ledger,
    monitor: NetworkMonitor,
    tokens: TokenManager,
    mail: Box<dyn MailSource>,
    sink: Box<dyn NoteSink>,
    notifier: Arc<dyn Notifier>,
    control: Option<mpsc::Receiver<ControlSignal>>,
    shutdown: watch::Sender<bool>,
    status: StatusBoard,
    paused: bool,
}

impl Service {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConfigHandle,
        ledger: Ledger,
        monitor: NetworkMonitor,
        tokens: TokenManager,
        mail: Box<dyn MailSource>,
        sink: Box<dyn NoteSink>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, ServiceHandle) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let status = StatusBoard::new();
        let handle = ServiceHandle::new(control_tx, status.clone());

        let service = Self {
            config,
            ledger,
            monitor,
            tokens,
            mail,
            sink,
            notifier,
            control: Some(control_rx),
            shutdown: shutdown_tx,
            status,
            paused: false,
        };
        (service, handle)
    }

    /// Foreground service loop. Returns after a shutdown signal.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let Some(mut control) = self.control.take() else {
            anyhow::bail!("service loop already started");
        };

        tracing::info!("mailbear service starting");
        if self.config.load().notifications.enabled {
            self.notifier
                .notify(Severity::Info, "Mailbear service started");
        }

        'main: loop {
            while self.paused {
                self.status.set_state(ServiceState::Paused);
                match control.recv().await {
                    Some(ControlSignal::Resume) => {
                        tracing::info!("service resumed");
                        self.paused = false;
                    }
                    Some(ControlSignal::Reload) => self.reload_config(),
                    Some(ControlSignal::Pause | ControlSignal::Wake) => {}
                    Some(ControlSignal::Shutdown) | None => break 'main,
                }
            }

            self.status.set_state(ServiceState::Idle);

            // Run one cycle while staying responsive to control signals.
            // Signals other than shutdown are applied at the cycle boundary
            // so the cycle completes under a consistent config snapshot.
            let mut pending_pause = false;
            let mut pending_reload = false;
            let outcome = {
                let shutdown = self.shutdown.clone();
                let cycle = self.run_cycle();
                tokio::pin!(cycle);
                loop {
                    tokio::select! {
                        outcome = &mut cycle => break Some(outcome),
                        signal = control.recv() => match signal {
                            Some(ControlSignal::Shutdown) | None => {
                                let _ = shutdown.send(true);
                                tokio::select! {
                                    _ = &mut cycle => {}
                                    () = tokio::time::sleep(SHUTDOWN_GRACE) => {
                                        tracing::warn!("cycle did not finish within shutdown grace");
                                    }
                                }
                                break None;
                            }
                            Some(ControlSignal::Pause) => pending_pause = true,
                            Some(ControlSignal::Resume) => pending_pause = false,
                            Some(ControlSignal::Reload) => pending_reload = true,
                            Some(ControlSignal::Wake) => {}
                        }
                    }
                }
            };
            let Some(outcome) = outcome else {
                break 'main;
            };

            if pending_reload {
                self.reload_config();
            }
            if pending_pause {
                self.paused = true;
                continue;
            }

            self.status.set_state(ServiceState::Sleeping);
            let (poll_secs, offline_secs) = {
                let cfg = self.config.load();
                (cfg.gmail.poll_interval_secs, cfg.network.offline_retry_secs)
            };
            let sleep_secs = match outcome {
                CycleOutcome::Offline => offline_secs,
                _ => poll_secs,
            };
            let deadline =
                tokio::time::Instant::now() + Duration::from_secs(sleep_secs.max(1));

            loop {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => break,
                    signal = control.recv() => match signal {
                        Some(ControlSignal::Wake | ControlSignal::Resume) => break,
                        Some(ControlSignal::Pause) => {
                            self.paused = true;
                            break;
                        }
                        // Reload mid-sleep is a cycle boundary; keep sleeping
                        // the remainder under the new snapshot.
                        Some(ControlSignal::Reload) => self.reload_config(),
                        Some(ControlSignal::Shutdown) | None => break 'main,
                    }
                }
            }
        }

        let _ = self.shutdown.send(true);
        self.status.set_state(ServiceState::Stopped);
        if self.config.load().notifications.enabled {
            self.notifier
                .notify(Severity::Info, "Mailbear service stopped");
        }
        tracing::info!("mailbear service stopped");
        Ok(())
    }

    /// One full poll cycle: check network, authenticate, fetch, process.
    ///
    /// Public so the `once` command and tests can drive single cycles
    /// without the outer loop.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let cfg = self.config.load_full();

        self.status.set_state(ServiceState::CheckingNetwork);
        let net = self.monitor.check().await;
        if !net.is_online {
            tracing::debug!(
                consecutive_failures = net.consecutive_failures,
                "offline, skipping cycle"
            );
            self.status.record_cycle_failure("network offline");
            return CycleOutcome::Offline;
        }

        self.status.set_state(ServiceState::Authenticating);
        let retry = self.retry_executor(cfg.as_ref());
        let credential = match self.tokens.get_valid_credential(&retry).await {
            Ok(credential) => credential,
            Err(error) => {
                tracing::warn!("skipping cycle, no valid credential: {error}");
                self.status.record_cycle_failure(&error.to_string());
                return CycleOutcome::AuthSkipped;
            }
        };
        let token = credential.access_token;

        self.status.set_state(ServiceState::Fetching);
        let listed = retry
            .execute(
                "list_messages",
                || {
                    self.mail
                        .list_new(&cfg.gmail.senders, cfg.gmail.max_results, &token)
                },
                log_attempt,
            )
            .await;
        let ids = match listed {
            Ok(ids) => ids,
            Err(error) => {
                tracing::warn!("listing messages failed: {error}");
                self.status.record_cycle_failure(&error.to_string());
                return CycleOutcome::FetchFailed;
            }
        };

        let new_ids: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.ledger.is_processed(id))
            .collect();
        if new_ids.is_empty() {
            tracing::debug!("no new messages");
            self.status.record_cycle_success();
            return CycleOutcome::Completed {
                processed: 0,
                failed: 0,
            };
        }

        self.status.set_state(ServiceState::Processing);
        tracing::info!(count = new_ids.len(), "processing new messages");

        let mut processed = 0usize;
        let mut failed = 0usize;
        for id in &new_ids {
            if *self.shutdown.borrow() {
                tracing::info!("shutdown requested, stopping mid-batch");
                break;
            }
            // Failures are contained to the message: it stays out of the
            // ledger and is retried on the next poll.
            match self.process_message(id, &token, cfg.as_ref(), &retry).await {
                Ok(()) => processed += 1,
                Err(error) => {
                    failed += 1;
                    tracing::warn!(id = %id, "message processing failed: {error:#}");
                    self.status.set_last_error(&format!("{id}: {error:#}"));
                }
            }
        }

        if processed > 0 && cfg.notifications.enabled {
            let plural = if processed == 1 { "" } else { "s" };
            self.notifier.notify(
                Severity::Info,
                &format!("Processed {processed} new email{plural}"),
            );
        }

        self.status.record_cycle_success();
        CycleOutcome::Completed { processed, failed }
    }

    async fn process_message(
        &mut self,
        id: &str,
        token: &str,
        cfg: &Config,
        retry: &RetryExecutor,
    ) -> anyhow::Result<()> {
        let email = retry
            .execute("fetch_message", || self.mail.fetch(id, token), log_attempt)
            .await
            .map_err(anyhow::Error::new)?;

        let note = Note {
            title: template::render(&cfg.bear.note_title, &email),
            body: template::render(&cfg.bear.note_body, &email),
            tags: cfg.bear.tags.clone(),
        };
        // Note creation runs once, not through the executor: the sink gives
        // no identifier back, so a retry could duplicate the note.
        self.sink.create(&note).await.context("note creation")?;

        retry
            .execute(
                "mark_handled",
                || self.mail.mark_handled(id, cfg.gmail.archive, token),
                log_attempt,
            )
            .await
            .map_err(anyhow::Error::new)?;

        self.ledger.mark_processed(id).context("ledger append")?;
        tracing::info!(id = %id, subject = %email.subject, "email bridged to note");
        Ok(())
    }

    fn retry_executor(&self, cfg: &Config) -> RetryExecutor {
        RetryExecutor::new(
            BackoffPolicy::from_config(&cfg.reliability),
            cfg.reliability.max_attempts,
            self.shutdown.subscribe(),
        )
    }

    fn reload_config(&self) {
        self.status.set_state(ServiceState::ReloadingConfig);
        match self.config.reload() {
            Ok(()) => {}
            Err(error) => {
                tracing::warn!("config reload failed, keeping previous snapshot: {error:#}");
            }
        }
    }
}
