//! # Mailshot
//!
//! Bulk email delivery: compose once, deliver to hundreds of recipients in
//! rate-limited batches, and end with a per-recipient record of what happened.
//!
//! ## Quick Start
//!
//! Set environment variables:
//! ```bash
//! EMAIL_PROVIDER=smtp
//! SMTP_HOST=smtp.example.com
//! SMTP_USERNAME=club
//! SMTP_PASSWORD=secret
//! EMAIL_FROM=noreply@club.example
//! EMAIL_FROM_NAME=Riverside FC
//! ```
//!
//! Build the engine and start its background loops:
//! ```rust,ignore
//! use mailshot::prelude::*;
//!
//! let mailer = BulkMailer::new(
//!     EngineConfig::from_env()?,
//!     mailshot::config::transport_from_env()?,
//!     store,      // your EmailStore
//!     resolver,   // your RecipientResolver
//!     Arc::new(NoAttachments),
//! )?;
//! mailer.start()?;
//!
//! let email_id = mailer
//!     .compose_and_send(account_id, user_id, ComposeRequest::new(
//!         "Season kick-off",
//!         "<p>First match is on <b>Saturday</b>.</p>",
//!         RecipientSelection::All,
//!     ))
//!     .await?;
//!
//! // ... later, on shutdown
//! mailer.stop().await;
//! ```
//!
//! ## How delivery works
//!
//! 1. `compose_and_send` resolves the recipient selection, persists the email
//!    and one `pending` row per recipient, and (unless scheduled for later)
//!    splits the recipients into batches on the [`DeliveryQueue`].
//! 2. The [`QueueProcessor`] picks one due batch per tick and sends to each
//!    recipient in order, pacing and rate-limiting according to the active
//!    [`ProviderProfile`].
//! 3. A rejected recipient is marked `failed`; an unreachable transport puts
//!    the whole batch through retry with backoff (1s, 5s, 15s).
//! 4. Once no batch of an email remains, the [`StatusReconciler`] marks it
//!    `sent`, `partial` or `failed` from the recipient rows.
//! 5. The [`ScheduledDispatchSweeper`] promotes due scheduled emails.
//!
//! ## Environment Variables
//!
//! See [`config`] for the full list.
//!
//! ## Feature Flags
//!
//! - `smtp` - SMTP transport via lettre
//! - `local` - LocalTransport and the [`testing`] assertions (default)
//! - `metrics` - Prometheus-style metrics (counters/histograms)
//! - `full` - All of the above
//!
//! ## Metrics
//!
//! Enable `features = ["metrics"]` to emit:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `mailshot_recipients_total` | Counter | status | Recipients sent or failed |
//! | `mailshot_batches_total` | Counter | outcome | Batches processed |
//! | `mailshot_batch_duration_seconds` | Histogram | | Time spent on one batch |
//!
//! Install a recorder (e.g., `metrics-exporter-prometheus`) in your app to collect them.
//! [`BulkMailer::queue_metrics`] is always available.

/// The version of the mailshot crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod address;
mod attachment;
mod dispatch;
mod engine;
mod error;
mod message;
mod model;
mod processor;
mod profile;
mod queue;
mod rate_limit;
mod reconcile;
mod resolver;
mod retry;
mod store;
mod sweeper;
mod transport;

pub mod config;
pub mod providers;

#[cfg(feature = "local")]
pub mod testing;

// Re-exports
pub use address::{Address, ToAddress};
pub use attachment::{Attachment, AttachmentType};
pub use config::EngineConfig;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use engine::{BulkMailer, QueueMetrics};
pub use error::{EngineError, MailError};
pub use message::{html_to_text, OutgoingMessage};
pub use model::{
    ComposeRequest, Email, EmailStatus, Recipient, RecipientSelection, RecipientStatus,
    ResolvedRecipient, StatusCounts,
};
pub use processor::{QueueProcessor, TickOutcome, EMAIL_ID_HEADER, RATE_LIMIT_BACKOFF};
pub use profile::ProviderProfile;
pub use queue::{
    BatchJob, DeliveryQueue, JobId, MessageSnapshot, QueueDepth, UnrecordedSend,
    DEFAULT_BATCH_SIZE,
};
pub use rate_limit::{RateLimitSnapshot, RateLimiter};
pub use reconcile::{DeliveryTally, Reconciliation, StatusReconciler};
pub use resolver::{
    AttachmentLoader, MemoryAttachments, NoAttachments, RecipientResolver, StaticResolver,
};
pub use retry::{RetryDecision, RetryPolicy, DEFAULT_BACKOFF, MAX_RETRIES, MAX_RETRIES_EXCEEDED};
pub use store::{EmailStore, MemoryEmailStore};
pub use sweeper::{ScheduledDispatchSweeper, SweepReport};
pub use transport::{SendReceipt, Transport, TransportExt};

/// Common imports for building and driving the engine.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        Address, Attachment, BulkMailer, ComposeRequest, EmailStatus, EmailStore, EngineConfig,
        EngineError, MailError, MemoryEmailStore, NoAttachments, OutgoingMessage,
        ProviderProfile, RecipientResolver, RecipientSelection, RecipientStatus,
        ResolvedRecipient, StaticResolver, Transport,
    };

    #[cfg(feature = "local")]
    pub use crate::providers::LocalTransport;
    pub use crate::providers::LoggerTransport;
}
