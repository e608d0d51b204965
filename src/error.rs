//! Error types for mailshot.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a [`Transport`](crate::Transport) or while building a message.
#[derive(Debug, Clone, Error)]
pub enum MailError {
    /// Email provider is not configured.
    #[error("Email provider not configured")]
    NotConfigured,

    /// Configuration error (missing env var, invalid value, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required field (e.g., from address).
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Invalid email address format.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Attachment has no content (neither data nor path provided).
    #[error("Attachment has no content: {0}")]
    AttachmentMissingContent(String),

    /// Attachment file not found.
    #[error("Attachment file not found: {0}")]
    AttachmentFileNotFound(String),

    /// Failed to read attachment file.
    #[error("Failed to read attachment: {0}")]
    AttachmentReadError(String),

    /// Error building the message.
    #[error("Build error: {0}")]
    BuildError(String),

    /// The provider rejected this one message.
    #[error("Send error: {0}")]
    SendError(String),

    /// The provider could not be reached at all.
    #[error("Transport unreachable: {0}")]
    Unreachable(String),

    /// Provider-specific error with details.
    #[error("Provider error ({provider}): {message}")]
    ProviderError {
        provider: &'static str,
        message: String,
        /// Optional HTTP/SMTP status code
        status: Option<u16>,
    },

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MailError {
    /// Create a provider-specific error.
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::ProviderError {
            provider,
            message: message.into(),
            status: None,
        }
    }

    /// Create a provider error with a status code.
    pub fn provider_with_status(
        provider: &'static str,
        message: impl Into<String>,
        status: u16,
    ) -> Self {
        Self::ProviderError {
            provider,
            message: message.into(),
            status: Some(status),
        }
    }

    /// Whether this error affects every send of a batch rather than one recipient.
    ///
    /// Configuration and connectivity faults are batch-fatal and go through
    /// retry/backoff. Everything else is recorded on the recipient that hit it.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::Configuration(_) | Self::Unreachable(_)
        )
    }
}

impl From<serde_json::Error> for MailError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        Self::BuildError(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        // Permanent/transient replies concern one recipient; anything without
        // an SMTP reply code never reached the server.
        if err.is_permanent() || err.is_transient() {
            Self::SendError(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

/// Errors surfaced by the bulk delivery engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Recipient resolution produced nobody to send to.
    #[error("Recipient selection resolved to zero recipients")]
    NoRecipients,

    /// The recipient resolver itself failed.
    #[error("Recipient resolution failed: {0}")]
    Resolution(String),

    /// The referenced email does not exist.
    #[error("Email not found: {0}")]
    EmailNotFound(Uuid),

    /// Persistence layer failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Attachment loading failed.
    #[error("Attachment error: {0}")]
    Attachments(String),

    /// A due scheduled email has no resolved recipients.
    #[error("Scheduled email {0} has no recipients")]
    SchedulingIntegrity(Uuid),

    /// `start()` was called while the background loops are running.
    #[error("Delivery engine is already running")]
    AlreadyRunning,

    /// Transport or configuration error.
    #[error(transparent)]
    Transport(#[from] MailError),
}
