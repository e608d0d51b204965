//! Persistence boundary for bulk emails and recipient rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Email, EmailStatus, Recipient, RecipientStatus, StatusCounts};

/// Email and recipient storage used by the engine.
///
/// Implement this over your database. [`MemoryEmailStore`] is provided for
/// development and tests.
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Persist a new email.
    async fn insert_email(&self, email: Email) -> Result<(), EngineError>;

    /// Load an email by ID.
    async fn get_email(&self, id: Uuid) -> Result<Option<Email>, EngineError>;

    /// Change an email's status.
    async fn set_status(&self, id: Uuid, status: EmailStatus) -> Result<(), EngineError>;

    /// Write the terminal status, delivery counts and `sent_at` in one update.
    async fn finalize_email(
        &self,
        id: Uuid,
        status: EmailStatus,
        successful: u32,
        failed: u32,
        sent_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Persist recipient rows.
    async fn insert_recipients(&self, recipients: Vec<Recipient>) -> Result<(), EngineError>;

    /// All recipient rows of an email, in insertion order.
    async fn recipients_for(&self, email_id: Uuid) -> Result<Vec<Recipient>, EngineError>;

    /// Record a successful send.
    async fn mark_recipient_sent(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Record a failed send with its error text.
    async fn mark_recipient_failed(
        &self,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<(), EngineError>;

    /// Fail the given recipients that are still pending. Returns how many changed.
    async fn fail_pending(&self, recipient_ids: &[Uuid], error: &str)
        -> Result<u32, EngineError>;

    /// Recipient rows of an email grouped by status.
    async fn status_counts(&self, email_id: Uuid) -> Result<StatusCounts, EngineError>;

    /// Emails in `scheduled` status due at or before `now`, earliest first.
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Email>, EngineError>;
}

#[derive(Debug, Default)]
struct Tables {
    emails: HashMap<Uuid, Email>,
    recipients: HashMap<Uuid, Recipient>,
    /// Recipient IDs per email, in insertion order.
    by_email: HashMap<Uuid, Vec<Uuid>>,
}

/// Thread-safe in-memory [`EmailStore`].
#[derive(Debug, Default)]
pub struct MemoryEmailStore {
    tables: RwLock<Tables>,
}

impl MemoryEmailStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of an email (synchronous, for assertions).
    pub fn email(&self, id: Uuid) -> Option<Email> {
        self.tables.read().emails.get(&id).cloned()
    }

    /// Snapshot of an email's recipients (synchronous, for assertions).
    pub fn recipients(&self, email_id: Uuid) -> Vec<Recipient> {
        let tables = self.tables.read();
        collect_recipients(&tables, email_id)
    }

    /// Number of stored emails.
    pub fn email_count(&self) -> usize {
        self.tables.read().emails.len()
    }

    /// Delete an email and its recipients.
    pub fn delete(&self, id: Uuid) -> bool {
        let mut tables = self.tables.write();
        if let Some(ids) = tables.by_email.remove(&id) {
            for rid in ids {
                tables.recipients.remove(&rid);
            }
        }
        tables.emails.remove(&id).is_some()
    }

    fn update_recipient<F>(&self, recipient_id: Uuid, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Recipient),
    {
        let mut tables = self.tables.write();
        let recipient = tables
            .recipients
            .get_mut(&recipient_id)
            .ok_or_else(|| EngineError::Store(format!("unknown recipient {}", recipient_id)))?;
        f(recipient);
        Ok(())
    }
}

fn collect_recipients(tables: &Tables, email_id: Uuid) -> Vec<Recipient> {
    tables
        .by_email
        .get(&email_id)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| tables.recipients.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl EmailStore for MemoryEmailStore {
    async fn insert_email(&self, email: Email) -> Result<(), EngineError> {
        self.tables.write().emails.insert(email.id, email);
        Ok(())
    }

    async fn get_email(&self, id: Uuid) -> Result<Option<Email>, EngineError> {
        Ok(self.email(id))
    }

    async fn set_status(&self, id: Uuid, status: EmailStatus) -> Result<(), EngineError> {
        let mut tables = self.tables.write();
        let email = tables
            .emails
            .get_mut(&id)
            .ok_or(EngineError::EmailNotFound(id))?;
        email.status = status;
        Ok(())
    }

    async fn finalize_email(
        &self,
        id: Uuid,
        status: EmailStatus,
        successful: u32,
        failed: u32,
        sent_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut tables = self.tables.write();
        let email = tables
            .emails
            .get_mut(&id)
            .ok_or(EngineError::EmailNotFound(id))?;
        if successful + failed > email.total_recipients {
            return Err(EngineError::Store(format!(
                "email {}: {} delivered + {} failed exceeds {} recipients",
                id, successful, failed, email.total_recipients
            )));
        }
        email.status = status;
        email.successful_deliveries = successful;
        email.failed_deliveries = failed;
        email.sent_at = Some(sent_at);
        Ok(())
    }

    async fn insert_recipients(&self, recipients: Vec<Recipient>) -> Result<(), EngineError> {
        let mut tables = self.tables.write();
        for recipient in recipients {
            tables
                .by_email
                .entry(recipient.email_id)
                .or_default()
                .push(recipient.id);
            tables.recipients.insert(recipient.id, recipient);
        }
        Ok(())
    }

    async fn recipients_for(&self, email_id: Uuid) -> Result<Vec<Recipient>, EngineError> {
        Ok(self.recipients(email_id))
    }

    async fn mark_recipient_sent(
        &self,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.update_recipient(recipient_id, |r| {
            r.status = RecipientStatus::Sent;
            r.error = None;
            r.sent_at = Some(at);
        })
    }

    async fn mark_recipient_failed(
        &self,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<(), EngineError> {
        self.update_recipient(recipient_id, |r| {
            r.status = RecipientStatus::Failed;
            r.error = Some(error.to_string());
        })
    }

    async fn fail_pending(
        &self,
        recipient_ids: &[Uuid],
        error: &str,
    ) -> Result<u32, EngineError> {
        let mut tables = self.tables.write();
        let mut changed = 0;
        for id in recipient_ids {
            if let Some(r) = tables.recipients.get_mut(id) {
                if r.status == RecipientStatus::Pending {
                    r.status = RecipientStatus::Failed;
                    r.error = Some(error.to_string());
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn status_counts(&self, email_id: Uuid) -> Result<StatusCounts, EngineError> {
        let tables = self.tables.read();
        let counts = tables
            .by_email
            .get(&email_id)
            .map(|ids| StatusCounts::tally(ids.iter().filter_map(|id| tables.recipients.get(id))))
            .unwrap_or_default();
        Ok(counts)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Email>, EngineError> {
        let tables = self.tables.read();
        let mut due: Vec<Email> = tables
            .emails
            .values()
            .filter(|e| e.status == EmailStatus::Scheduled)
            .filter(|e| e.scheduled_send_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.scheduled_send_at);
        Ok(due)
    }
}
