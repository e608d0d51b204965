//! Derive an email's terminal status from its recipient rows.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::EmailStatus;
use crate::queue::DeliveryQueue;
use crate::store::EmailStore;

/// Outcome of one reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Batches for the email are still queued; nothing written.
    Deferred,
    /// The email is not being delivered (draft or scheduled); nothing written.
    Skipped(EmailStatus),
    /// Terminal status and counts were written.
    Finalized(DeliveryTally),
    /// The stored terminal state already matched; nothing written.
    Unchanged(DeliveryTally),
}

/// Final counts of one email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTally {
    pub status: EmailStatus,
    pub successful: u32,
    pub failed: u32,
}

/// Finalizes emails once every batch has drained from the queue.
pub struct StatusReconciler {
    store: Arc<dyn EmailStore>,
    queue: Arc<DeliveryQueue>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn EmailStore>, queue: Arc<DeliveryQueue>) -> Self {
        Self { store, queue }
    }

    /// Finalize `email_id` if no job for it remains queued.
    ///
    /// Reconciling an already-final email again is a no-op.
    pub async fn reconcile(&self, email_id: Uuid) -> Result<Reconciliation, EngineError> {
        if self.queue.has_jobs_for(email_id) {
            tracing::debug!(%email_id, "Batches still queued, deferring reconciliation");
            return Ok(Reconciliation::Deferred);
        }

        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or(EngineError::EmailNotFound(email_id))?;
        if matches!(email.status, EmailStatus::Draft | EmailStatus::Scheduled) {
            return Ok(Reconciliation::Skipped(email.status));
        }

        let counts = self.store.status_counts(email_id).await?;
        if counts.pending > 0 {
            tracing::warn!(
                %email_id,
                pending = counts.pending,
                "Finalizing email with recipients that were never attempted"
            );
        }

        let tally = DeliveryTally {
            status: EmailStatus::from_counts(counts.sent, counts.failed),
            successful: counts.sent,
            failed: counts.failed,
        };

        if email.status == tally.status
            && email.successful_deliveries == tally.successful
            && email.failed_deliveries == tally.failed
        {
            return Ok(Reconciliation::Unchanged(tally));
        }

        self.store
            .finalize_email(email_id, tally.status, tally.successful, tally.failed, Utc::now())
            .await?;

        tracing::info!(
            %email_id,
            status = ?tally.status,
            successful = tally.successful,
            failed = tally.failed,
            "Bulk email finalized"
        );

        Ok(Reconciliation::Finalized(tally))
    }
}
