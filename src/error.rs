use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `mailbear`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Deduplication ledger ────────────────────────────────────────────
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    // ── Authentication / token lifecycle ────────────────────────────────
    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    // ── Mail source API ──────────────────────────────────────────────────
    #[error("mail: {0}")]
    Mail(#[from] MailApiError),

    // ── Note sink ────────────────────────────────────────────────────────
    #[error("notes: {0}")]
    Notes(#[from] NoteError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("hot-reload failed: {0}")]
    HotReload(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Ledger errors ───────────────────────────────────────────────────────────

/// Failures of the processed-message ledger.
///
/// `Corrupt` is fatal at startup: running with an unknown dedup state risks
/// duplicate notes or silently dropped messages, so the service refuses to
/// start instead.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger file corrupt at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Auth errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no stored credential; run `mailbear auth` first")]
    Missing,

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("grant revoked or expired; reauthorization required")]
    NeedsReauth,

    #[error("credential store: {0}")]
    Store(String),
}

// ─── Mail source API errors ─────────────────────────────────────────────────

/// Typed errors produced by the mail source client.
///
/// The classifier downcasts to this before falling back to `reqwest` errors
/// and string scanning, so the wire layer should prefer these variants.
#[derive(Debug, Error)]
pub enum MailApiError {
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication rejected ({status})")]
    Unauthorized { status: u16 },

    #[error("api returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

// ─── Note sink errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("failed to invoke note handler: {0}")]
    Invoke(String),

    #[error("note handler exited with {0}")]
    HandlerFailed(String),
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_corrupt_displays_line() {
        let err = BridgeError::Ledger(LedgerError::Corrupt {
            line: 42,
            message: "bad json".into(),
        });
        assert!(err.to_string().contains("line 42"));
    }

    #[test]
    fn rate_limited_displays_hint() {
        let err = BridgeError::Mail(MailApiError::RateLimited {
            retry_after_secs: Some(30),
        });
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let bridge_err: BridgeError = anyhow_err.into();
        assert!(bridge_err.to_string().contains("something went wrong"));
    }

    #[test]
    fn auth_missing_mentions_remediation() {
        let err = BridgeError::Auth(AuthError::Missing);
        assert!(err.to_string().contains("mailbear auth"));
    }
}
