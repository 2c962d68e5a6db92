mod store;

pub use store::{CredentialStore, EncryptedFileStore};

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AuthError, MailApiError};
use crate::notify::{Notifier, Severity};
use crate::retry::{RetryError, RetryExecutor, log_attempt};

/// Refresh this long before the recorded expiry so an access token never goes
/// stale mid-cycle.
pub const REFRESH_MARGIN_SECS: i64 = 300;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth credential as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when a refresh came back `invalid_grant`; cleared when a freshly
    /// authorized credential appears in the store.
    #[serde(default)]
    pub needs_reauth: bool,
}

impl Credential {
    /// True when the token is expired or will expire within the margin.
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + ChronoDuration::seconds(REFRESH_MARGIN_SECS) >= expires_at
            }
            // Unknown expiry: refresh defensively.
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Token lifecycle: load, refresh ahead of expiry, and escalate revoked
/// grants to the human exactly once per episode.
///
/// `invalid_grant` means the refresh token itself is dead; retrying cannot
/// fix that, so the manager flags the stored credential, notifies once, and
/// keeps returning [`AuthError::NeedsReauth`] until a fresh credential shows
/// up in the store (written out-of-band by `mailbear auth`).
pub struct TokenManager {
    store: Box<dyn CredentialStore>,
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    notifier: Arc<dyn Notifier>,
    reauth_notified: bool,
}

impl TokenManager {
    pub fn new(
        store: Box<dyn CredentialStore>,
        client_id: String,
        client_secret: String,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            token_url: TOKEN_URL.to_string(),
            client_id,
            client_secret,
            notifier,
            reauth_notified: false,
        }
    }

    /// Point the manager at a different token endpoint (used by tests).
    pub fn with_token_url(mut self, url: String) -> Self {
        self.token_url = url;
        self
    }

    /// Return a credential whose access token is valid for at least the
    /// refresh margin, refreshing through `retry` if needed.
    pub async fn get_valid_credential(
        &mut self,
        retry: &RetryExecutor,
    ) -> Result<Credential, AuthError> {
        // Re-read the store each time so an out-of-band reauthorization is
        // picked up on the next cycle without restarting the service.
        let Some(credential) = self.store.load()? else {
            if !self.reauth_notified {
                self.reauth_notified = true;
                self.notifier.notify(
                    Severity::Error,
                    "No Gmail credential found. Run `mailbear auth` to authorize.",
                );
            }
            return Err(AuthError::Missing);
        };

        if credential.needs_reauth {
            if !self.reauth_notified {
                self.reauth_notified = true;
                self.notifier.notify(
                    Severity::Error,
                    "Gmail authorization was revoked. Run `mailbear auth` to reauthorize.",
                );
            }
            return Err(AuthError::NeedsReauth);
        }

        if !credential.needs_refresh() {
            // A clean credential in the store ends any earlier episode.
            self.reauth_notified = false;
            return Ok(credential);
        }

        match self.refresh(retry, &credential).await {
            Ok(refreshed) => {
                self.store.save(&refreshed)?;
                self.reauth_notified = false;
                Ok(refreshed)
            }
            Err(retry_err) => {
                if retry_err.classification() == Some(&crate::retry::Classification::Auth) {
                    let mut flagged = credential;
                    flagged.needs_reauth = true;
                    self.store.save(&flagged)?;
                    if !self.reauth_notified {
                        self.reauth_notified = true;
                        self.notifier.notify(
                            Severity::Error,
                            "Gmail authorization was revoked. Run `mailbear auth` to reauthorize.",
                        );
                    }
                    Err(AuthError::NeedsReauth)
                } else {
                    Err(AuthError::Refresh(format!("{retry_err}")))
                }
            }
        }
    }

    async fn refresh(
        &self,
        retry: &RetryExecutor,
        credential: &Credential,
    ) -> Result<Credential, RetryError> {
        let refreshed = retry
            .execute(
                "token_refresh",
                || self.request_refresh(&credential.refresh_token),
                log_attempt,
            )
            .await?;

        Ok(Credential {
            access_token: refreshed.access_token,
            // Google usually omits the refresh token on refresh responses;
            // keep the one we have unless a new one is issued.
            refresh_token: refreshed
                .refresh_token
                .unwrap_or_else(|| credential.refresh_token.clone()),
            expires_at: refreshed
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            needs_reauth: false,
        })
    }

    async fn request_refresh(&self, refresh_token: &str) -> anyhow::Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("token endpoint unreachable")?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .context("malformed token response");
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("invalid_grant") {
            return Err(anyhow::Error::new(MailApiError::Unauthorized {
                status: status.as_u16(),
            })
            .context("refresh token rejected (invalid_grant)"));
        }
        Err(anyhow::Error::new(MailApiError::Status {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        }))
    }
}
