use anyhow::Result;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use url::Url;

use crate::error::NoteError;

/// A fully rendered note ready for delivery.
#[derive(Debug, Clone)]
pub struct Note {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

/// Write side of the bridge. Like [`crate::gmail::MailSource`], the service
/// loop only sees the trait.
#[async_trait]
pub trait NoteSink: Send + Sync {
    async fn create(&self, note: &Note) -> Result<()>;
}

/// Bear.app sink using the x-callback-url scheme.
///
/// The URL is handed to `open -g` so Bear receives it without being brought
/// to the foreground. Bear offers no synchronous success signal over this
/// scheme; a zero exit from `open` is the best confirmation available.
pub struct BearSink {
    opener: String,
}

impl BearSink {
    pub fn new() -> Self {
        Self {
            opener: "open".to_string(),
        }
    }

    #[cfg(test)]
    fn with_opener(opener: String) -> Self {
        Self { opener }
    }

    fn build_url(note: &Note) -> Url {
        // The scheme is fixed, so parsing cannot fail.
        let mut url = Url::parse("bear://x-callback-url/create")
            .unwrap_or_else(|_| unreachable!("static bear URL is valid"));
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("title", &note.title);
            pairs.append_pair("text", &note.body);
            if !note.tags.is_empty() {
                pairs.append_pair("tags", &note.tags.join(","));
            }
            pairs.append_pair("open_note", "no");
            pairs.append_pair("show_window", "no");
        }
        url
    }
}

impl Default for BearSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NoteSink for BearSink {
    async fn create(&self, note: &Note) -> Result<()> {
        let url = Self::build_url(note);
        tracing::debug!(title = %note.title, "delivering note to Bear");

        let status = Command::new(&self.opener)
            .arg("-g")
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| NoteError::Invoke(e.to_string()))?;

        if !status.success() {
            return Err(NoteError::HandlerFailed(status.to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Note {
        Note {
            title: "Email: Server down".into(),
            body: "# Server down\n\nFrom: alerts@example.com".into(),
            tags: vec!["email".into(), "gmail".into()],
        }
    }

    #[test]
    fn url_carries_title_text_and_tags() {
        let url = BearSink::build_url(&note());
        assert_eq!(url.scheme(), "bear");
        assert_eq!(url.host_str(), Some("x-callback-url"));
        assert_eq!(url.path(), "/create");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("title".into(), "Email: Server down".into())));
        assert!(pairs.contains(&("tags".into(), "email,gmail".into())));
        assert!(
            pairs
                .iter()
                .any(|(k, v)| k == "text" && v.contains("Server down"))
        );
    }

    #[test]
    fn empty_tags_omit_the_parameter() {
        let url = BearSink::build_url(&Note {
            tags: Vec::new(),
            ..note()
        });
        assert!(url.query_pairs().all(|(k, _)| k != "tags"));
    }

    #[test]
    fn newlines_and_specials_are_percent_encoded() {
        let url = BearSink::build_url(&Note {
            title: "a&b".into(),
            body: "line1\nline2".into(),
            tags: Vec::new(),
        });
        let raw = url.as_str();
        assert!(!raw.contains('\n'));
        assert!(raw.contains("a%26b"));
    }

    #[tokio::test]
    async fn successful_opener_exit_is_ok() {
        let sink = BearSink::with_opener("true".into());
        assert!(sink.create(&note()).await.is_ok());
    }

    #[tokio::test]
    async fn failing_opener_surfaces_handler_error() {
        let sink = BearSink::with_opener("false".into());
        let err = sink.create(&note()).await.unwrap_err();
        assert!(err.downcast_ref::<NoteError>().is_some());
    }

    #[tokio::test]
    async fn missing_opener_surfaces_invoke_error() {
        let sink = BearSink::with_opener("/nonexistent/opener-binary".into());
        let err = sink.create(&note()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NoteError>(),
            Some(NoteError::Invoke(_))
        ));
    }
}
