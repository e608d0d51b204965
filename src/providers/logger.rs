//! Logger transport that only logs messages.
//!
//! Useful for staging environments: the full bulk pipeline runs, batches are
//! paced and reconciled, but nothing leaves the process.

use async_trait::async_trait;

use crate::error::MailError;
use crate::message::OutgoingMessage;
use crate::transport::{SendReceipt, Transport};

/// Transport that emits a tracing event per message and always succeeds.
pub struct LoggerTransport {
    /// If true, log full message details. If false, just recipient and subject.
    log_full: bool,
}

impl LoggerTransport {
    /// Create a logger transport with brief output.
    pub fn new() -> Self {
        Self { log_full: false }
    }

    /// Create a logger transport with full message details.
    pub fn full() -> Self {
        Self { log_full: true }
    }

    /// Set whether to log full message details.
    pub fn log_full(mut self, full: bool) -> Self {
        self.log_full = full;
        self
    }
}

impl Default for LoggerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoggerTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, MailError> {
        let message_id = uuid::Uuid::new_v4().to_string();

        if self.log_full {
            tracing::info!(
                message_id = %message_id,
                from = ?message.from.as_ref().map(|a| a.formatted()),
                to = %message.to.formatted(),
                reply_to = ?message.reply_to.as_ref().map(|a| a.formatted()),
                subject = %message.subject,
                has_html = message.html_body.is_some(),
                has_text = message.text_body.is_some(),
                attachments = message.attachments.len(),
                "Message logged (full)"
            );

            if let Some(ref text) = message.text_body {
                tracing::debug!(body = %text, "Text body");
            }
        } else {
            tracing::info!(
                message_id = %message_id,
                to = %message.to.email,
                subject = %message.subject,
                "Message logged"
            );
        }

        Ok(SendReceipt::new(message_id))
    }

    fn provider_name(&self) -> &'static str {
        "logger"
    }
}
