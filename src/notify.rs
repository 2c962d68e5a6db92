use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Fire-and-forget surface for human-facing messages.
///
/// Implementations must never block the caller and never fail outward;
/// delivery problems are logged and swallowed.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// macOS desktop notifications via `osascript`.
///
/// The process is spawned on a detached task so a slow or missing `osascript`
/// never stalls the service loop.
pub struct DesktopNotifier {
    app_name: String,
    enabled: bool,
}

impl DesktopNotifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            app_name: "Mailbear".to_string(),
            enabled,
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(notification = message, "user notification"),
            Severity::Warning => tracing::warn!(notification = message, "user notification"),
            Severity::Error => tracing::error!(notification = message, "user notification"),
        }

        if !self.enabled {
            return;
        }

        let title = match severity {
            Severity::Info => self.app_name.clone(),
            Severity::Warning => format!("{} - Warning", self.app_name),
            Severity::Error => format!("{} - Error", self.app_name),
        };
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(message),
            escape_applescript(&title),
        );

        tokio::spawn(async move {
            let result = Command::new("osascript")
                .arg("-e")
                .arg(&script)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = result {
                tracing::debug!("desktop notification delivery failed: {e}");
            }
        });
    }
}

/// Log-only notifier used off macOS, where `osascript` is unavailable.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(notification = message, "user notification"),
            Severity::Warning => tracing::warn!(notification = message, "user notification"),
            Severity::Error => tracing::error!(notification = message, "user notification"),
        }
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_applescript(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_applescript(r"a\b"), r"a\\b");
    }

    #[test]
    fn log_notifier_never_panics() {
        LogNotifier.notify(Severity::Error, "something broke");
        LogNotifier.notify(Severity::Info, "all good");
    }
}
