use std::time::Duration;

use crate::error::MailApiError;

/// Failure taxonomy driving the retry policy.
///
/// Rules apply in order, first match wins: connection/DNS-level failures are
/// `Transient`; explicit rate-limit signals are `RateLimit` (carrying any
/// server-provided retry-after hint); 401/403/invalid_grant are `Auth` and
/// are escalated rather than retried here; everything unclassified is
/// `Permanent` and surfaced to the caller immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Transient,
    RateLimit { retry_after: Option<Duration> },
    Auth,
    Permanent,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit { .. })
    }
}

pub fn classify(err: &anyhow::Error) -> Classification {
    // Typed errors from our own wire layer carry the most signal.
    if let Some(api_err) = err.downcast_ref::<MailApiError>() {
        return match api_err {
            MailApiError::RateLimited { retry_after_secs } => Classification::RateLimit {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            MailApiError::Unauthorized { .. } => Classification::Auth,
            MailApiError::Status { status, .. } => classify_status(*status),
            MailApiError::Decode(_) => Classification::Permanent,
        };
    }

    // reqwest errors distinguish connect/timeout failures from HTTP statuses.
    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
        if reqwest_err.is_connect() || reqwest_err.is_timeout() {
            return Classification::Transient;
        }
        if let Some(status) = reqwest_err.status() {
            return classify_status(status.as_u16());
        }
        // Request never reached the wire or the body was cut short.
        return Classification::Transient;
    }

    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        return classify_io(io_err);
    }

    // String fallback: scan the rendered chain for well-known signals.
    let msg = format!("{err:#}").to_ascii_lowercase();
    if msg.contains("invalid_grant") || msg.contains("unauthorized") || msg.contains("forbidden") {
        return Classification::Auth;
    }
    if msg.contains("rate limit") || msg.contains("too many requests") {
        return Classification::RateLimit { retry_after: None };
    }
    if msg.contains("dns")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("timed out")
        || msg.contains("network")
        || msg.contains("broken pipe")
    {
        return Classification::Transient;
    }

    Classification::Permanent
}

fn classify_status(status: u16) -> Classification {
    match status {
        429 => Classification::RateLimit { retry_after: None },
        401 | 403 => Classification::Auth,
        408 | 500..=599 => Classification::Transient,
        _ => Classification::Permanent,
    }
}

fn classify_io(err: &std::io::Error) -> Classification {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::Interrupted => Classification::Transient,
        _ => Classification::Permanent,
    }
}
