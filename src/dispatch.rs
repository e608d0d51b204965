//! The enqueue path shared by immediate compose and the scheduled sweeper.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Email, EmailStatus, Recipient, RecipientStatus};
use crate::queue::{DeliveryQueue, JobId, MessageSnapshot};
use crate::reconcile::StatusReconciler;
use crate::resolver::AttachmentLoader;
use crate::store::EmailStore;

/// What [`Dispatcher::send_bulk_email`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Batches were enqueued.
    Enqueued { jobs: Vec<JobId>, recipients: usize },
    /// Jobs for the email were already queued; nothing changed.
    AlreadyQueued,
    /// No recipient was pending; the email was reconciled instead.
    NothingPending,
    /// The email is scheduled for later and was left to the sweeper.
    NotDue { scheduled_send_at: DateTime<Utc> },
}

/// Turns persisted emails into queued batch jobs.
pub struct Dispatcher {
    store: Arc<dyn EmailStore>,
    queue: Arc<DeliveryQueue>,
    attachments: Arc<dyn AttachmentLoader>,
    reconciler: Arc<StatusReconciler>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EmailStore>,
        queue: Arc<DeliveryQueue>,
        attachments: Arc<dyn AttachmentLoader>,
        reconciler: Arc<StatusReconciler>,
    ) -> Self {
        Self {
            store,
            queue,
            attachments,
            reconciler,
        }
    }

    /// Enqueue every still-pending recipient of `email_id`.
    ///
    /// Safe to call repeatedly: nothing is enqueued while jobs for the email
    /// are queued, and recipients that already have an outcome are skipped.
    /// A `scheduled` email is only dispatched once its send time has passed.
    pub async fn send_bulk_email(&self, email_id: Uuid) -> Result<DispatchOutcome, EngineError> {
        self.dispatch(email_id, Utc::now()).await
    }

    /// [`send_bulk_email`](Self::send_bulk_email) with an explicit clock.
    ///
    /// A due `scheduled` email is moved to `sending` before its first job is
    /// queued. If loading its attachments fails it stays `scheduled`.
    pub async fn dispatch(
        &self,
        email_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, EngineError> {
        if self.queue.has_jobs_for(email_id) {
            tracing::debug!(%email_id, "Email already queued");
            return Ok(DispatchOutcome::AlreadyQueued);
        }

        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or(EngineError::EmailNotFound(email_id))?;

        let promoting = email.status == EmailStatus::Scheduled;
        if promoting {
            if let Some(at) = email.scheduled_send_at.filter(|at| *at > now) {
                tracing::debug!(%email_id, scheduled_send_at = %at, "Scheduled email not due");
                return Ok(DispatchOutcome::NotDue {
                    scheduled_send_at: at,
                });
            }
        }

        let pending: Vec<Recipient> = self
            .store
            .recipients_for(email_id)
            .await?
            .into_iter()
            .filter(|r| r.status == RecipientStatus::Pending)
            .collect();

        if pending.is_empty() {
            if promoting {
                self.store.set_status(email_id, EmailStatus::Sending).await?;
            }
            if let Err(e) = self.reconciler.reconcile(email_id).await {
                if promoting {
                    if let Err(revert) =
                        self.store.set_status(email_id, EmailStatus::Scheduled).await
                    {
                        tracing::error!(
                            %email_id,
                            error = %revert,
                            "Failed to return email to scheduled"
                        );
                    }
                }
                return Err(e);
            }
            return Ok(DispatchOutcome::NothingPending);
        }

        let content = self.snapshot(&email).await?;
        if promoting {
            self.store.set_status(email_id, EmailStatus::Sending).await?;
        }

        let recipients = pending.len();
        let jobs = self.queue.enqueue(email_id, pending, content);
        tracing::info!(
            %email_id,
            recipients,
            batches = jobs.len(),
            "Bulk email enqueued"
        );
        Ok(DispatchOutcome::Enqueued { jobs, recipients })
    }

    /// Subject, body and attachments shared by every batch of `email`.
    async fn snapshot(&self, email: &Email) -> Result<Arc<MessageSnapshot>, EngineError> {
        let attachments = self.attachments.load(email.id).await?;
        Ok(Arc::new(MessageSnapshot {
            subject: email.subject.clone(),
            html_body: email.html_body.clone(),
            text_body: email.text_body.clone(),
            reply_to: email.reply_to.clone(),
            attachments,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Attachment;
    use crate::model::ResolvedRecipient;
    use crate::profile::ProviderProfile;
    use crate::resolver::MemoryAttachments;
    use crate::store::MemoryEmailStore;
    use chrono::Duration;

    type Setup = (Arc<MemoryEmailStore>, Arc<DeliveryQueue>, Dispatcher, Uuid);

    async fn setup(n: usize) -> Setup {
        setup_email(n, EmailStatus::Sending, None).await
    }

    async fn setup_email(
        n: usize,
        status: EmailStatus,
        scheduled_send_at: Option<DateTime<Utc>>,
    ) -> Setup {
        let store = MemoryEmailStore::shared();
        let queue = Arc::new(DeliveryQueue::new(4, ProviderProfile::PERMISSIVE));
        let attachments = Arc::new(MemoryAttachments::new());
        let id = Uuid::new_v4();
        attachments.attach(id, Attachment::from_bytes("kit.pdf", vec![1, 2, 3]));

        store
            .insert_email(Email {
                id,
                account_id: Uuid::new_v4(),
                created_by: Uuid::new_v4(),
                subject: "Kit order".into(),
                html_body: "<p>Order now</p>".into(),
                text_body: "Order now".into(),
                reply_to: None,
                status,
                scheduled_send_at,
                total_recipients: n as u32,
                successful_deliveries: 0,
                failed_deliveries: 0,
                sent_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .insert_recipients(
                (0..n)
                    .map(|i| Recipient::pending(id, ResolvedRecipient::new(format!("m{}@x.org", i), "member")))
                    .collect(),
            )
            .await
            .unwrap();

        let reconciler = Arc::new(StatusReconciler::new(store.clone(), queue.clone()));
        let dispatcher = Dispatcher::new(store.clone(), queue.clone(), attachments, reconciler);
        (store, queue, dispatcher, id)
    }

    #[tokio::test]
    async fn test_enqueues_pending_with_attachments() {
        let (_store, queue, dispatcher, id) = setup(10).await;

        let outcome = dispatcher.send_bulk_email(id).await.unwrap();
        let DispatchOutcome::Enqueued { jobs, recipients } = outcome else {
            panic!("expected enqueue");
        };
        assert_eq!(recipients, 10);
        assert_eq!(jobs.len(), 3);
        let job = queue.get(&jobs[0]).unwrap();
        assert_eq!(job.content.attachments.len(), 1);
        assert_eq!(job.content.subject, "Kit order");
    }

    #[tokio::test]
    async fn test_second_trigger_is_noop() {
        let (_store, queue, dispatcher, id) = setup(5).await;

        dispatcher.send_bulk_email(id).await.unwrap();
        assert_eq!(
            dispatcher.send_bulk_email(id).await.unwrap(),
            DispatchOutcome::AlreadyQueued
        );
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_skips_recipients_with_outcome() {
        let (store, queue, dispatcher, id) = setup(3).await;
        let first = store.recipients(id)[0].id;
        store.mark_recipient_sent(first, Utc::now()).await.unwrap();

        dispatcher.send_bulk_email(id).await.unwrap();
        let jobs = queue.jobs_for(id);
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].recipients().iter().all(|r| r.id != first));
    }

    #[tokio::test]
    async fn test_nothing_pending_reconciles() {
        let (store, queue, dispatcher, id) = setup(2).await;
        let ids: Vec<Uuid> = store.recipients(id).iter().map(|r| r.id).collect();
        store.mark_recipient_sent(ids[0], Utc::now()).await.unwrap();
        store.mark_recipient_failed(ids[1], "bounced").await.unwrap();

        assert_eq!(
            dispatcher.send_bulk_email(id).await.unwrap(),
            DispatchOutcome::NothingPending
        );
        assert!(queue.is_empty());
        assert_eq!(store.email(id).unwrap().status, EmailStatus::Partial);
    }

    #[tokio::test]
    async fn test_unknown_email() {
        let (_store, _queue, dispatcher, _) = setup(1).await;
        assert!(matches!(
            dispatcher.send_bulk_email(Uuid::new_v4()).await,
            Err(EngineError::EmailNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_email_waits_until_due() {
        let now = Utc::now();
        let due = now + Duration::hours(1);
        let (store, queue, dispatcher, id) =
            setup_email(3, EmailStatus::Scheduled, Some(due)).await;

        assert_eq!(
            dispatcher.send_bulk_email(id).await.unwrap(),
            DispatchOutcome::NotDue {
                scheduled_send_at: due
            }
        );
        assert!(queue.is_empty());
        assert_eq!(store.email(id).unwrap().status, EmailStatus::Scheduled);

        let outcome = dispatcher.dispatch(id, due).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Enqueued { recipients: 3, .. }));
        assert_eq!(store.email(id).unwrap().status, EmailStatus::Sending);
    }

    #[tokio::test]
    async fn test_due_email_with_all_outcomes_is_finalized() {
        let now = Utc::now();
        let (store, queue, dispatcher, id) =
            setup_email(1, EmailStatus::Scheduled, Some(now)).await;
        let only = store.recipients(id)[0].id;
        store.mark_recipient_sent(only, now).await.unwrap();

        assert_eq!(
            dispatcher.dispatch(id, now).await.unwrap(),
            DispatchOutcome::NothingPending
        );
        assert!(queue.is_empty());
        assert_eq!(store.email(id).unwrap().status, EmailStatus::Sent);
    }
}
