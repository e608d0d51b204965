//! Local transport for development and testing.
//!
//! Captures every message in memory instead of handing it to a carrier, and
//! can simulate both kinds of failure the engine distinguishes:
//!
//! - per-recipient rejections ([`LocalTransport::fail_for`]), recorded on the
//!   recipient without affecting the rest of the batch;
//! - whole-transport outages ([`LocalTransport::set_unreachable`],
//!   [`LocalTransport::unreachable_for`]), which drive batch retry/backoff.
//!
//! ```rust,ignore
//! use mailshot::providers::LocalTransport;
//! use mailshot::testing::*;
//!
//! let transport = LocalTransport::new();
//! transport.fail_for("bounced@example.com", "mailbox unavailable");
//!
//! // ... run the engine ...
//!
//! assert_sent_to(&transport, "ok@example.com");
//! refute_sent_to(&transport, "bounced@example.com");
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::MailError;
use crate::message::OutgoingMessage;
use crate::transport::{SendReceipt, Transport};

/// A message captured by [`LocalTransport`].
#[derive(Debug, Clone)]
pub struct CapturedMessage {
    /// Message ID handed back to the engine.
    pub id: String,
    /// The message as the engine built it.
    pub message: OutgoingMessage,
    /// When it was captured.
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LocalState {
    captured: RwLock<Vec<CapturedMessage>>,
    /// Lowercased address -> rejection reason.
    rejections: RwLock<HashMap<String, String>>,
    /// Permanent outage message, if set.
    unreachable: RwLock<Option<String>>,
    /// Remaining sends that fail as unreachable before the transport recovers.
    outages_remaining: AtomicUsize,
    /// Every call to `send`, including failed ones.
    attempts: AtomicUsize,
}

/// In-memory transport. Clones share captured messages and failure settings.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    state: Arc<LocalState>,
}

impl LocalTransport {
    /// Create a new local transport with empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Failure Simulation
    // =========================================================================

    /// Reject every send to `email` with `reason` (a per-recipient failure).
    pub fn fail_for(&self, email: &str, reason: impl Into<String>) {
        self.state
            .rejections
            .write()
            .insert(email.to_ascii_lowercase(), reason.into());
    }

    /// Make every send fail as unreachable until [`clear_failures`](Self::clear_failures).
    pub fn set_unreachable(&self, message: impl Into<String>) {
        *self.state.unreachable.write() = Some(message.into());
    }

    /// Fail the next `sends` calls as unreachable, then recover.
    pub fn unreachable_for(&self, sends: usize) {
        self.state.outages_remaining.store(sends, Ordering::SeqCst);
    }

    /// Clear all simulated failures.
    pub fn clear_failures(&self) {
        self.state.rejections.write().clear();
        *self.state.unreachable.write() = None;
        self.state.outages_remaining.store(0, Ordering::SeqCst);
    }

    // =========================================================================
    // Capture Access
    // =========================================================================

    /// All captured messages, oldest first.
    pub fn messages(&self) -> Vec<CapturedMessage> {
        self.state.captured.read().clone()
    }

    /// Number of successfully captured messages.
    pub fn sent_count(&self) -> usize {
        self.state.captured.read().len()
    }

    /// Number of `send` calls, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Whether a message was captured for `email`.
    pub fn sent_to(&self, email: &str) -> bool {
        self.state
            .captured
            .read()
            .iter()
            .any(|c| c.message.to.email.eq_ignore_ascii_case(email))
    }

    /// How many messages were captured for `email`.
    pub fn count_to(&self, email: &str) -> usize {
        self.state
            .captured
            .read()
            .iter()
            .filter(|c| c.message.to.email.eq_ignore_ascii_case(email))
            .count()
    }

    /// Captured messages matching a predicate.
    pub fn find<F>(&self, predicate: F) -> Vec<CapturedMessage>
    where
        F: Fn(&OutgoingMessage) -> bool,
    {
        self.state
            .captured
            .read()
            .iter()
            .filter(|c| predicate(&c.message))
            .cloned()
            .collect()
    }

    /// Remove and return all captured messages.
    pub fn flush(&self) -> Vec<CapturedMessage> {
        std::mem::take(&mut *self.state.captured.write())
    }

    fn take_outage(&self) -> bool {
        self.state
            .outages_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, MailError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(ref reason) = *self.state.unreachable.read() {
            return Err(MailError::Unreachable(reason.clone()));
        }
        if self.take_outage() {
            return Err(MailError::Unreachable("simulated outage".into()));
        }
        if let Some(reason) = self
            .state
            .rejections
            .read()
            .get(&message.to.email.to_ascii_lowercase())
        {
            return Err(MailError::SendError(reason.clone()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.state.captured.write().push(CapturedMessage {
            id: id.clone(),
            message: message.clone(),
            sent_at: Utc::now(),
        });

        Ok(SendReceipt::new(id.clone()).with_preview(format!("local://outbox/{}", id)))
    }

    fn provider_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(to: &str) -> OutgoingMessage {
        OutgoingMessage::new(to)
            .from("club@example.com")
            .subject("Hello")
    }

    #[tokio::test]
    async fn test_captures_messages() {
        let transport = LocalTransport::new();
        let receipt = transport.send(&msg("a@example.com")).await.unwrap();

        assert!(!receipt.message_id.is_empty());
        assert!(receipt.preview_url.unwrap().ends_with(&receipt.message_id));
        assert_eq!(transport.sent_count(), 1);
        assert!(transport.sent_to("A@example.com"));
    }

    #[tokio::test]
    async fn test_fail_for_is_per_recipient() {
        let transport = LocalTransport::new();
        transport.fail_for("Bounce@example.com", "550 no such user");

        let err = transport.send(&msg("bounce@example.com")).await.unwrap_err();
        assert!(!err.is_batch_fatal());
        assert!(err.to_string().contains("550"));

        assert!(transport.send(&msg("ok@example.com")).await.is_ok());
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.attempt_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_for_recovers() {
        let transport = LocalTransport::new();
        transport.unreachable_for(2);

        for _ in 0..2 {
            let err = transport.send(&msg("a@example.com")).await.unwrap_err();
            assert!(err.is_batch_fatal());
        }
        assert!(transport.send(&msg("a@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let transport = LocalTransport::new();
        let other = transport.clone();
        other.send(&msg("a@example.com")).await.unwrap();

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.flush().len(), 1);
        assert_eq!(other.sent_count(), 0);
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(LocalTransport::new().provider_name(), "local");
    }
}
