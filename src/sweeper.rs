//! Promotes due scheduled emails into the delivery queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::EngineError;
use crate::model::{Email, EmailStatus};
use crate::store::EmailStore;

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Emails whose recipients were enqueued.
    pub dispatched: Vec<Uuid>,
    /// Due emails with no recipient rows, marked failed.
    pub failed: Vec<Uuid>,
    /// Emails that hit an error and were left `scheduled` for the next sweep.
    pub errors: Vec<(Uuid, String)>,
}

enum Promotion {
    Dispatched,
    Failed,
    NotDue,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.failed.is_empty() && self.errors.is_empty()
    }
}

/// Finds `scheduled` emails whose send time has passed and dispatches them.
pub struct ScheduledDispatchSweeper {
    store: Arc<dyn EmailStore>,
    dispatcher: Arc<Dispatcher>,
}

impl ScheduledDispatchSweeper {
    pub fn new(store: Arc<dyn EmailStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Sweep using the current wall-clock time.
    pub async fn run_once(&self) -> Result<SweepReport, EngineError> {
        self.sweep(Utc::now()).await
    }

    /// Dispatch every email due at `now`, earliest first.
    ///
    /// Only the due-email query itself can fail the sweep; a failure on one
    /// email is logged and recorded in the report.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let due = self.store.due_scheduled(now).await?;
        let mut report = SweepReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        tracing::debug!(due = due.len(), "Sweeping scheduled emails");

        for email in due {
            let email_id = email.id;
            match self.promote(email, now).await {
                Ok(Promotion::Dispatched) => report.dispatched.push(email_id),
                Ok(Promotion::Failed) => report.failed.push(email_id),
                Ok(Promotion::NotDue) => {}
                Err(e) => {
                    tracing::error!(%email_id, error = %e, "Failed to dispatch scheduled email");
                    report.errors.push((email_id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn promote(&self, email: Email, now: DateTime<Utc>) -> Result<Promotion, EngineError> {
        let recipients = self.store.recipients_for(email.id).await?;
        if recipients.is_empty() {
            let err = EngineError::SchedulingIntegrity(email.id);
            tracing::warn!(email_id = %email.id, error = %err, "Marking scheduled email failed");
            self.store
                .finalize_email(email.id, EmailStatus::Failed, 0, 0, now)
                .await?;
            return Ok(Promotion::Failed);
        }

        tracing::info!(
            email_id = %email.id,
            recipients = recipients.len(),
            scheduled_send_at = ?email.scheduled_send_at,
            "Scheduled email due"
        );
        match self.dispatcher.dispatch(email.id, now).await? {
            DispatchOutcome::NotDue { .. } => Ok(Promotion::NotDue),
            _ => Ok(Promotion::Dispatched),
        }
    }
}
