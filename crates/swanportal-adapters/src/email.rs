//! Email transport capability.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::Serialize;

use crate::LogSink;

/// Email transport failure.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// One attachment of an outgoing message.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    /// File name shown to the recipient.
    pub file_name: String,
    /// Raw content.
    pub content: Vec<u8>,
    /// MIME type.
    pub content_type: String,
    /// Content-ID for inline (cid-referenced) attachments, `None` for
    /// regular file attachments.
    pub content_id: Option<String>,
}

impl EmailAttachment {
    /// A regular file attachment.
    pub fn file(file_name: impl Into<String>, content: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            content_type: content_type.into(),
            content_id: None,
        }
    }

    /// An inline attachment referenced from HTML by Content-ID.
    pub fn inline(
        file_name: impl Into<String>,
        content: Vec<u8>,
        content_type: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            content_type: content_type.into(),
            content_id: Some(content_id.into()),
        }
    }

    /// Inline attachment from optional file content.
    ///
    /// A missing asset degrades to empty content with a logged error; the
    /// message is still sent.
    pub fn inline_or_empty(
        log: &dyn LogSink,
        file_name: impl Into<String>,
        content: Option<Vec<u8>>,
        content_type: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Self {
        let file_name = file_name.into();
        let content = match content {
            Some(content) => content,
            None => {
                log.error("Failed to load email attachment", &[("fileName", &file_name)]);
                Vec::new()
            }
        };
        Self::inline(file_name, content, content_type, content_id)
    }
}

/// Outbound email transport.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message.
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body_text: &str,
        body_html: &str,
        attachments: Vec<EmailAttachment>,
    ) -> Result<(), EmailError>;
}

/// A message captured by [`MemoryMailer`].
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Transport that keeps sent messages in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl MemoryMailer {
    /// Create an empty mailer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, in order.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailSender for MemoryMailer {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body_text: &str,
        body_html: &str,
        attachments: Vec<EmailAttachment>,
    ) -> Result<(), EmailError> {
        self.sent.lock().push(SentEmail {
            recipient: recipient.into(),
            subject: subject.into(),
            body_text: body_text.into(),
            body_html: body_html.into(),
            attachments,
        });
        Ok(())
    }
}

#[derive(Serialize)]
struct SpoolAttachment<'a> {
    file_name: &'a str,
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<&'a str>,
    content_base64: String,
}

#[derive(Serialize)]
struct SpoolMessage<'a> {
    source: &'a str,
    recipient: &'a str,
    subject: &'a str,
    body_text: &'a str,
    body_html: &'a str,
    attachments: Vec<SpoolAttachment<'a>>,
}

/// Transport that drops messages into a local spool directory as JSON
/// documents, one file per message, for a relay agent to pick up.
#[derive(Debug)]
pub struct SpoolMailer {
    spool_dir: PathBuf,
    source: String,
    sequence: AtomicU64,
}

impl SpoolMailer {
    /// Create a mailer spooling into `spool_dir` with `source` as the
    /// envelope-from address. The directory must already exist.
    pub fn new(spool_dir: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            source: source.into(),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_file_name(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{now}-{}-{sequence}.json", std::process::id())
    }
}

#[async_trait]
impl EmailSender for SpoolMailer {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body_text: &str,
        body_html: &str,
        attachments: Vec<EmailAttachment>,
    ) -> Result<(), EmailError> {
        let message = SpoolMessage {
            source: &self.source,
            recipient,
            subject,
            body_text,
            body_html,
            attachments: attachments
                .iter()
                .map(|a| SpoolAttachment {
                    file_name: &a.file_name,
                    content_type: &a.content_type,
                    content_id: a.content_id.as_deref(),
                    content_base64: BASE64.encode(&a.content),
                })
                .collect(),
        };

        let encoded =
            serde_json::to_vec(&message).map_err(|e| EmailError::Transport(e.to_string()))?;

        // Write to a dotted name first so the relay never sees a partial
        // file.
        let file_name = self.next_file_name();
        let staging = self.spool_dir.join(format!(".{file_name}"));
        let target = self.spool_dir.join(&file_name);
        tokio::fs::write(&staging, encoded)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryLogSink;

    #[tokio::test]
    async fn test_memory_mailer_captures() {
        let mailer = MemoryMailer::new();
        mailer
            .send(
                "alice@example.com",
                "subject",
                "text",
                "<p>html</p>",
                vec![EmailAttachment::file("a.zip", vec![1, 2], "application/zip")],
            )
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "alice@example.com");
        assert_eq!(sent[0].attachments[0].file_name, "a.zip");
        assert!(sent[0].attachments[0].content_id.is_none());
    }

    #[test]
    fn test_inline_or_empty_missing_asset() {
        let log = MemoryLogSink::new();
        let att =
            EmailAttachment::inline_or_empty(&log, "logo.png", None, "image/png", "logo");

        assert!(att.content.is_empty());
        assert_eq!(att.content_id.as_deref(), Some("logo"));
        assert_eq!(log.records().len(), 1);
    }

    #[tokio::test]
    async fn test_spool_mailer_writes_message_file() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = SpoolMailer::new(dir.path(), "vpn@example.com");

        mailer
            .send(
                "alice@example.com",
                "subject",
                "text",
                "<p>html</p>",
                vec![EmailAttachment::inline("logo.png", vec![1, 2], "image/png", "logo")],
            )
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);

        let message: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&entries[0]).unwrap()).unwrap();
        assert_eq!(message["source"], "vpn@example.com");
        assert_eq!(message["recipient"], "alice@example.com");
        assert_eq!(message["attachments"][0]["content_id"], "logo");
        assert_eq!(message["attachments"][0]["content_base64"], "AQI=");
    }
}
