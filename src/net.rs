use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::notify::{Notifier, Severity};

/// Independent well-known resolvers; any one answering means we are online,
/// so a single resolver outage never produces a false offline reading.
pub const DEFAULT_PROBE_TARGETS: [&str; 3] = ["8.8.8.8:53", "1.1.1.1:53", "9.9.9.9:53"];

/// Current reachability as seen by the monitor. Read-only outside this module.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_transition: Option<DateTime<Utc>>,
}

impl NetworkStatus {
    fn initial() -> Self {
        // Optimistic start: the first cycle probes before fetching anyway.
        Self {
            is_online: true,
            consecutive_failures: 0,
            last_check: None,
            last_transition: None,
        }
    }
}

/// Single reachability probe against one target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration) -> bool;
}

/// TCP connect probe; DNS resolvers answer on 53/tcp.
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &str, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}

/// Periodic internet-reachability detector.
///
/// Probes run in sequence with a short per-probe timeout so one unresponsive
/// target cannot stall a check beyond `targets.len() * probe_timeout`. Going
/// offline requires `failure_threshold` consecutive failed checks (a single
/// lost check is usually packet loss, not an outage); coming back online takes
/// exactly one successful probe. Each transition fires one notifier call.
pub struct NetworkMonitor {
    prober: Box<dyn Prober>,
    targets: Vec<String>,
    probe_timeout: Duration,
    failure_threshold: u32,
    notifier: Arc<dyn Notifier>,
    status: NetworkStatus,
}

impl NetworkMonitor {
    pub fn new(config: &NetworkConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_prober(
            Box::new(TcpProber),
            DEFAULT_PROBE_TARGETS.iter().map(|s| (*s).to_string()).collect(),
            config,
            notifier,
        )
    }

    pub fn with_prober(
        prober: Box<dyn Prober>,
        targets: Vec<String>,
        config: &NetworkConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            prober,
            targets,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs.max(1)),
            failure_threshold: config.failure_threshold.max(1),
            notifier,
            status: NetworkStatus::initial(),
        }
    }

    /// Last cached status without re-probing. Staleness is bounded by the
    /// caller's check interval; callers needing fresh data call [`check`].
    pub fn status(&self) -> &NetworkStatus {
        &self.status
    }

    /// Probe all targets and update the cached status.
    pub async fn check(&mut self) -> NetworkStatus {
        let mut reachable = false;
        for target in &self.targets {
            if self.prober.probe(target, self.probe_timeout).await {
                reachable = true;
                break;
            }
        }

        let now = Utc::now();
        self.status.last_check = Some(now);

        if reachable {
            let recovered_failures = self.status.consecutive_failures;
            self.status.consecutive_failures = 0;
            if !self.status.is_online {
                self.status.is_online = true;
                self.status.last_transition = Some(now);
                tracing::info!(
                    failures = recovered_failures,
                    "network connection restored"
                );
                self.notifier
                    .notify(Severity::Info, "Network connection restored");
            }
        } else {
            self.status.consecutive_failures = self.status.consecutive_failures.saturating_add(1);
            if self.status.is_online && self.status.consecutive_failures >= self.failure_threshold {
                self.status.is_online = false;
                self.status.last_transition = Some(now);
                tracing::warn!(
                    consecutive_failures = self.status.consecutive_failures,
                    "network connection lost"
                );
                self.notifier.notify(
                    Severity::Warning,
                    "Network connection lost; polling suspended until it returns",
                );
            }
        }

        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProber {
        // Each check consumes one entry; `true` means some target answers.
        outcomes: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _target: &str, _timeout: Duration) -> bool {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() { false } else { outcomes.remove(0) }
        }
    }

    struct CountingNotifier {
        calls: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, _severity: Severity, _message: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn monitor_with(
        outcomes: Vec<bool>,
        threshold: u32,
    ) -> (NetworkMonitor, Arc<CountingNotifier>) {
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        });
        let config = NetworkConfig {
            failure_threshold: threshold,
            probe_timeout_secs: 1,
            ..NetworkConfig::default()
        };
        let monitor = NetworkMonitor::with_prober(
            Box::new(ScriptedProber {
                outcomes: Mutex::new(outcomes),
            }),
            // One logical target per check keeps the script simple.
            vec!["test:53".into()],
            &config,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        );
        (monitor, notifier)
    }

    #[tokio::test]
    async fn single_failure_below_threshold_stays_online() {
        let (mut monitor, notifier) = monitor_with(vec![false], 2);
        let status = monitor.check().await;
        assert!(status.is_online);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn threshold_failures_go_offline_with_one_notification() {
        let (mut monitor, notifier) = monitor_with(vec![false, false, false], 2);
        monitor.check().await;
        let status = monitor.check().await;
        assert!(!status.is_online);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);

        // Staying offline must not re-notify.
        let status = monitor.check().await;
        assert!(!status.is_online);
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_success_recovers_after_any_number_of_failures() {
        let (mut monitor, notifier) = monitor_with(vec![false, false, false, false, true], 2);
        for _ in 0..4 {
            monitor.check().await;
        }
        assert!(!monitor.status().is_online);

        let status = monitor.check().await;
        assert!(status.is_online);
        assert_eq!(status.consecutive_failures, 0);
        // One offline notification plus one recovery notification.
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
        assert!(status.last_transition.is_some());
    }

    #[tokio::test]
    async fn any_target_success_means_online() {
        // First target down, second answers: the check as a whole succeeds.
        struct SecondAnswers;
        #[async_trait]
        impl Prober for SecondAnswers {
            async fn probe(&self, target: &str, _timeout: Duration) -> bool {
                target == "b:53"
            }
        }

        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        });
        let mut monitor = NetworkMonitor::with_prober(
            Box::new(SecondAnswers),
            vec!["a:53".into(), "b:53".into()],
            &NetworkConfig::default(),
            notifier as Arc<dyn Notifier>,
        );

        let status = monitor.check().await;
        assert!(status.is_online);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn cached_status_does_not_probe() {
        let (mut monitor, _) = monitor_with(vec![true], 2);
        monitor.check().await;
        // The script is exhausted; reading status must not consume anything.
        let status = monitor.status();
        assert!(status.is_online);
        assert!(status.last_check.is_some());
    }
}
