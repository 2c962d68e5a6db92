use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::error::MailApiError;

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// One email, flattened to the fields the note templates can use.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
}

/// Read side of the mailbox. The service loop only sees this trait, so tests
/// drive the loop with a scripted source instead of a live API.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Ids of unread messages from the watched senders, newest capped at
    /// `max_results`.
    async fn list_new(
        &self,
        senders: &[String],
        max_results: u32,
        access_token: &str,
    ) -> Result<Vec<String>>;

    async fn fetch(&self, id: &str, access_token: &str) -> Result<EmailMessage>;

    /// Mark the message read, and archive it when `archive` is set.
    async fn mark_handled(&self, id: &str, archive: bool, access_token: &str) -> Result<()>;
}

/// Gmail REST API client.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl GmailClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    /// Point the client at a different API root (used by wire-level tests).
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `from:(a OR b) is:unread` - the server filters so one poll returns
    /// only actionable ids.
    fn build_query(senders: &[String]) -> String {
        format!("from:({}) is:unread", senders.join(" OR "))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error = match status.as_u16() {
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                MailApiError::RateLimited { retry_after_secs }
            }
            401 | 403 => MailApiError::Unauthorized {
                status: status.as_u16(),
            },
            _ => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(200)
                    .collect();
                MailApiError::Status {
                    status: status.as_u16(),
                    message,
                }
            }
        };
        Err(anyhow::Error::new(error))
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list_new(
        &self,
        senders: &[String],
        max_results: u32,
        access_token: &str,
    ) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/messages", self.base_url))
            .bearer_auth(access_token)
            .query(&[
                ("q", Self::build_query(senders)),
                ("maxResults", max_results.to_string()),
            ])
            .send()
            .await
            .context("message list request failed")?;
        let response = Self::check_status(response).await?;

        let listing: MessageList = response
            .json()
            .await
            .map_err(|e| MailApiError::Decode(format!("message list: {e}")))?;
        Ok(listing
            .messages
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    async fn fetch(&self, id: &str, access_token: &str) -> Result<EmailMessage> {
        let response = self
            .http
            .get(format!("{}/messages/{id}", self.base_url))
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .context("message fetch request failed")?;
        let response = Self::check_status(response).await?;

        let raw: RawMessage = response
            .json()
            .await
            .map_err(|e| MailApiError::Decode(format!("message {id}: {e}")))?;
        Ok(raw.into_email())
    }

    async fn mark_handled(&self, id: &str, archive: bool, access_token: &str) -> Result<()> {
        let mut remove_labels = vec!["UNREAD"];
        if archive {
            remove_labels.push("INBOX");
        }

        let response = self
            .http
            .post(format!("{}/messages/{id}/modify", self.base_url))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "removeLabelIds": remove_labels }))
            .send()
            .await
            .context("message modify request failed")?;
        Self::check_status(response).await?;
        Ok(())
    }
}

// ─── Wire format ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Body,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    data: Option<String>,
}

impl RawMessage {
    fn into_email(self) -> EmailMessage {
        let header = |name: &str| {
            self.payload
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
                .unwrap_or_default()
        };
        let subject = {
            let s = header("Subject");
            if s.is_empty() { "(no subject)".to_string() } else { s }
        };
        let sender = header("From");
        let date = header("Date");
        let body = extract_body(&self.payload).unwrap_or_default();

        EmailMessage {
            id: self.id,
            subject,
            sender,
            date,
            body,
        }
    }
}

/// Depth-first body extraction: a `text/plain` part anywhere wins, then
/// `text/html`, then whatever the top-level body carries.
fn extract_body(payload: &Payload) -> Option<String> {
    if let Some(text) = find_part(payload, "text/plain") {
        return Some(text);
    }
    if let Some(html) = find_part(payload, "text/html") {
        return Some(html);
    }
    payload.body.data.as_deref().and_then(decode_body)
}

fn find_part(payload: &Payload, mime_type: &str) -> Option<String> {
    if payload.mime_type == mime_type {
        if let Some(text) = payload.body.data.as_deref().and_then(decode_body) {
            return Some(text);
        }
    }
    payload.parts.iter().find_map(|p| find_part(p, mime_type))
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    fn raw_multipart() -> RawMessage {
        serde_json::from_value(serde_json::json!({
            "id": "m-1",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    { "name": "Subject", "value": "Server down" },
                    { "name": "from", "value": "Alerts <alerts@example.com>" },
                    { "name": "Date", "value": "Wed, 27 Aug 2026 10:00:00 +0000" }
                ],
                "parts": [
                    {
                        "mimeType": "text/html",
                        "body": { "data": encode("<b>html body</b>") }
                    },
                    {
                        "mimeType": "text/plain",
                        "body": { "data": encode("plain body") }
                    }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn query_joins_senders_with_or() {
        let q = GmailClient::build_query(&["a@x.com".into(), "b@y.com".into()]);
        assert_eq!(q, "from:(a@x.com OR b@y.com) is:unread");
    }

    #[test]
    fn multipart_prefers_text_plain() {
        let email = raw_multipart().into_email();
        assert_eq!(email.body, "plain body");
        assert_eq!(email.subject, "Server down");
        // Header lookup is case-insensitive.
        assert_eq!(email.sender, "Alerts <alerts@example.com>");
    }

    #[test]
    fn html_only_falls_back_to_html_part() {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "id": "m-2",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [],
                "parts": [
                    { "mimeType": "text/html", "body": { "data": encode("<p>only html</p>") } }
                ]
            }
        }))
        .unwrap();
        assert_eq!(raw.into_email().body, "<p>only html</p>");
    }

    #[test]
    fn single_part_body_is_decoded() {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "id": "m-3",
            "payload": {
                "mimeType": "text/plain",
                "headers": [],
                "body": { "data": encode("inline body") }
            }
        }))
        .unwrap();
        assert_eq!(raw.into_email().body, "inline body");
    }

    #[test]
    fn nested_multipart_is_searched_recursively() {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "id": "m-4",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            { "mimeType": "text/plain", "body": { "data": encode("nested plain") } }
                        ]
                    }
                ]
            }
        }))
        .unwrap();
        assert_eq!(raw.into_email().body, "nested plain");
    }

    #[test]
    fn padded_base64url_still_decodes() {
        // Some producers emit padded URL-safe base64.
        let padded = base64::engine::general_purpose::URL_SAFE.encode("padded==body");
        assert_eq!(decode_body(&padded).unwrap(), "padded==body");
    }

    #[test]
    fn missing_subject_gets_placeholder() {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "id": "m-5",
            "payload": { "mimeType": "text/plain", "headers": [] }
        }))
        .unwrap();
        let email = raw.into_email();
        assert_eq!(email.subject, "(no subject)");
        assert_eq!(email.body, "");
    }
}
