//! Transport trait: the "send one email" capability the engine drives.
//!
//! # Why `async_trait`?
//!
//! The engine holds its transport as `Arc<dyn Transport>` so the provider can
//! be chosen from the environment at startup. Native async traits are not
//! object-safe, so the trait is declared with `#[async_trait]`. The boxed
//! future costs one allocation per send, which is invisible next to network
//! latency.
//!
//! # Failure contract
//!
//! `send` must be safe to call repeatedly. Ordinary delivery failures (a
//! rejected mailbox, a provider refusing one message) are returned as
//! errors for which [`MailError::is_batch_fatal`] is `false`; the engine
//! records them on the recipient and moves on. Configuration and
//! connectivity faults are batch-fatal and send the whole batch through
//! retry/backoff.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailError;
use crate::message::OutgoingMessage;

/// Result of a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Message ID assigned by the provider
    pub message_id: String,
    /// Optional preview / tracking link (sandbox providers, local capture)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

impl SendReceipt {
    /// Create a receipt with just a message ID.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            preview_url: None,
        }
    }

    /// Attach a preview or tracking link.
    pub fn with_preview(mut self, url: impl Into<String>) -> Self {
        self.preview_url = Some(url.into());
        self
    }
}

/// Single-send transport implemented by every provider.
///
/// ```ignore
/// use mailshot::{OutgoingMessage, Transport};
/// use mailshot::providers::LoggerTransport;
///
/// let transport = LoggerTransport::new();
/// let receipt = transport
///     .send(&OutgoingMessage::new("fan@example.com").from("club@example.com"))
///     .await?;
/// println!("sent as {}", receipt.message_id);
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to its single recipient.
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, MailError>;

    /// Get the provider name (for logging and provider profile selection).
    fn provider_name(&self) -> &'static str {
        "unknown"
    }

    /// Validate configuration.
    ///
    /// Called before every batch; an error here is treated as a batch failure.
    fn validate_config(&self) -> Result<(), MailError> {
        Ok(())
    }
}

/// Extension trait for optional transport operations.
pub trait TransportExt: Transport {
    /// Validate a message before sending.
    fn validate(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        if message.from.is_none() {
            return Err(MailError::MissingField("from"));
        }
        if message.to.email.is_empty() {
            return Err(MailError::MissingField("to"));
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
