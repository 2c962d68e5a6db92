use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound control messages the orchestrator selects on during its waits.
///
/// The transport (Unix signals, CLI, tests) is a collaborator concern; the
/// loop only ever sees this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Resume,
    Reload,
    Shutdown,
    /// Cut the current sleep short and start the next cycle immediately
    /// (system wake, explicit poll-now).
    Wake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    CheckingNetwork,
    Authenticating,
    Fetching,
    Processing,
    Sleeping,
    Paused,
    ReloadingConfig,
    Stopped,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingNetwork => "checking-network",
            Self::Authenticating => "authenticating",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Sleeping => "sleeping",
            Self::Paused => "paused",
            Self::ReloadingConfig => "reloading-config",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the loop, readable without locking.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: ServiceState,
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: ServiceState::Idle,
            last_cycle_time: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// Lock-free publisher for the status snapshot; the loop writes, any number
/// of readers load.
#[derive(Clone)]
pub(crate) struct StatusBoard {
    inner: Arc<ArcSwap<StatusSnapshot>>,
}

impl StatusBoard {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(StatusSnapshot::default())),
        }
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        self.inner.load().as_ref().clone()
    }

    pub(crate) fn set_state(&self, state: ServiceState) {
        let mut snapshot = self.snapshot();
        snapshot.state = state;
        self.inner.store(Arc::new(snapshot));
    }

    pub(crate) fn record_cycle_success(&self) {
        let mut snapshot = self.snapshot();
        snapshot.last_cycle_time = Some(Utc::now());
        snapshot.consecutive_failures = 0;
        self.inner.store(Arc::new(snapshot));
    }

    /// Surface an error in status output without counting the cycle failed.
    pub(crate) fn set_last_error(&self, error: &str) {
        let mut snapshot = self.snapshot();
        snapshot.last_error = Some(error.to_string());
        self.inner.store(Arc::new(snapshot));
    }

    pub(crate) fn record_cycle_failure(&self, error: &str) {
        let mut snapshot = self.snapshot();
        snapshot.last_cycle_time = Some(Utc::now());
        snapshot.last_error = Some(error.to_string());
        snapshot.consecutive_failures = snapshot.consecutive_failures.saturating_add(1);
        self.inner.store(Arc::new(snapshot));
    }
}

/// Outward control surface handed to the CLI/signal layer.
#[derive(Clone)]
pub struct ServiceHandle {
    control: mpsc::Sender<ControlSignal>,
    status: StatusBoard,
}

impl ServiceHandle {
    pub(crate) fn new(control: mpsc::Sender<ControlSignal>, status: StatusBoard) -> Self {
        Self { control, status }
    }

    pub fn pause(&self) {
        self.send(ControlSignal::Pause);
    }

    pub fn resume(&self) {
        self.send(ControlSignal::Resume);
    }

    pub fn reload_config(&self) {
        self.send(ControlSignal::Reload);
    }

    pub fn request_shutdown(&self) {
        self.send(ControlSignal::Shutdown);
    }

    pub fn wake(&self) {
        self.send(ControlSignal::Wake);
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    fn send(&self, signal: ControlSignal) {
        // A full channel means a burst of signals is already queued; dropping
        // the newest is harmless because signals are level-triggered.
        if let Err(e) = self.control.try_send(signal) {
            tracing::warn!(signal = ?signal, "control signal dropped: {e}");
        }
    }
}
