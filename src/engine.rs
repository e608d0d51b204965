//! The bulk mailer: compose, dispatch, and the two background loops.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{self, EngineConfig};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{EngineError, MailError};
use crate::message::html_to_text;
use crate::model::{ComposeRequest, Email, EmailStatus, Recipient, ResolvedRecipient};
use crate::processor::QueueProcessor;
use crate::profile::ProviderProfile;
use crate::queue::DeliveryQueue;
use crate::rate_limit::{RateLimitSnapshot, RateLimiter};
use crate::reconcile::StatusReconciler;
use crate::resolver::{AttachmentLoader, RecipientResolver};
use crate::store::EmailStore;
use crate::sweeper::ScheduledDispatchSweeper;
use crate::transport::Transport;

/// Queue and rate-limit state for observability.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    /// Jobs waiting to run.
    pub pending: usize,
    /// Jobs being processed right now.
    pub processing: usize,
    pub rate_limit: RateLimitSnapshot,
    /// Name of the active transport.
    pub provider: &'static str,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Bulk email delivery engine.
///
/// ```rust,ignore
/// use mailshot::prelude::*;
///
/// let mailer = BulkMailer::new(
///     EngineConfig::from_env()?,
///     mailshot::config::transport_from_env()?,
///     MemoryEmailStore::shared(),
///     Arc::new(resolver),
///     Arc::new(NoAttachments),
/// )?;
/// mailer.start()?;
///
/// let email_id = mailer
///     .compose_and_send(account_id, user_id, ComposeRequest::new(
///         "Training moved",
///         "<p>Training is on <b>Thursday</b> this week.</p>",
///         RecipientSelection::Groups { ids: vec![u12_team] },
///     ))
///     .await?;
/// ```
pub struct BulkMailer {
    config: EngineConfig,
    profile: ProviderProfile,
    transport: Arc<dyn Transport>,
    store: Arc<dyn EmailStore>,
    resolver: Arc<dyn RecipientResolver>,
    attachments: Arc<dyn AttachmentLoader>,
    queue: Arc<DeliveryQueue>,
    limiter: Arc<RateLimiter>,
    reconciler: Arc<StatusReconciler>,
    dispatcher: Arc<Dispatcher>,
    processor: Arc<QueueProcessor>,
    sweeper: Arc<ScheduledDispatchSweeper>,
    running: Mutex<Option<Running>>,
}

impl BulkMailer {
    /// Assemble an engine. The provider profile is picked from the
    /// transport's name and kept for the life of the engine.
    ///
    /// Fails when no sender is configured and `EMAIL_FROM` is unset.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn EmailStore>,
        resolver: Arc<dyn RecipientResolver>,
        attachments: Arc<dyn AttachmentLoader>,
    ) -> Result<Self, EngineError> {
        let profile = ProviderProfile::for_provider(transport.provider_name());
        Self::assemble(config, profile, transport, store, resolver, attachments)
    }

    /// Replace the provider profile. Call before [`start`](Self::start).
    pub fn with_profile(self, profile: ProviderProfile) -> Result<Self, EngineError> {
        Self::assemble(
            self.config.clone(),
            profile,
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            Arc::clone(&self.attachments),
        )
    }

    fn assemble(
        mut config: EngineConfig,
        profile: ProviderProfile,
        transport: Arc<dyn Transport>,
        store: Arc<dyn EmailStore>,
        resolver: Arc<dyn RecipientResolver>,
        attachments: Arc<dyn AttachmentLoader>,
    ) -> Result<Self, EngineError> {
        if config.from.is_none() {
            config.from = config::default_from();
        }
        let from = config.from.clone().ok_or(MailError::MissingField("from"))?;

        let queue = Arc::new(DeliveryQueue::new(config.batch_size, profile));
        let limiter = Arc::new(RateLimiter::new(profile));
        let reconciler = Arc::new(StatusReconciler::new(store.clone(), queue.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queue.clone(),
            attachments.clone(),
            reconciler.clone(),
        ));
        let processor = Arc::new(QueueProcessor::new(
            queue.clone(),
            limiter.clone(),
            transport.clone(),
            store.clone(),
            reconciler.clone(),
            config.retry.clone(),
            from,
            config.tick_budget,
        ));
        let sweeper = Arc::new(ScheduledDispatchSweeper::new(store.clone(), dispatcher.clone()));

        tracing::debug!(
            provider = transport.provider_name(),
            profile = profile.name,
            batch_size = config.batch_size,
            "Bulk mailer configured"
        );

        Ok(Self {
            config,
            profile,
            transport,
            store,
            resolver,
            attachments,
            queue,
            limiter,
            reconciler,
            dispatcher,
            processor,
            sweeper,
            running: Mutex::new(None),
        })
    }

    /// Resolve recipients, persist the email and its recipient rows, and
    /// enqueue it unless it is scheduled for later.
    ///
    /// Fails with [`EngineError::NoRecipients`] before persisting anything
    /// when the selection resolves to nobody.
    pub async fn compose_and_send(
        &self,
        account_id: Uuid,
        created_by: Uuid,
        request: ComposeRequest,
    ) -> Result<Uuid, EngineError> {
        let resolved = self.resolver.resolve(account_id, &request.recipients).await?;
        let resolved = dedup(resolved);
        if resolved.is_empty() {
            return Err(EngineError::NoRecipients);
        }

        let total_recipients = u32::try_from(resolved.len()).map_err(|_| {
            EngineError::Resolution(format!("{} recipients exceeds the limit", resolved.len()))
        })?;
        let now = Utc::now();
        let deferred = request.scheduled_send_at.is_some_and(|at| at > now);
        let email = Email {
            id: Uuid::new_v4(),
            account_id,
            created_by,
            text_body: request
                .text_body
                .unwrap_or_else(|| html_to_text(&request.html_body)),
            subject: request.subject,
            html_body: request.html_body,
            reply_to: request.reply_to.or_else(|| self.config.reply_to.clone()),
            status: if deferred {
                EmailStatus::Scheduled
            } else {
                EmailStatus::Sending
            },
            scheduled_send_at: request.scheduled_send_at,
            total_recipients,
            successful_deliveries: 0,
            failed_deliveries: 0,
            sent_at: None,
            created_at: now,
        };
        let email_id = email.id;
        let total = resolved.len();
        let rows: Vec<Recipient> = resolved
            .into_iter()
            .map(|r| Recipient::pending(email_id, r))
            .collect();

        self.store.insert_email(email).await?;
        self.store.insert_recipients(rows).await?;

        tracing::info!(
            %email_id,
            %account_id,
            recipients = total,
            scheduled = deferred,
            "Bulk email composed"
        );

        if !deferred {
            self.dispatcher.send_bulk_email(email_id).await?;
        }
        Ok(email_id)
    }

    /// Enqueue the pending recipients of an existing email. Idempotent.
    pub async fn send_bulk_email(&self, email_id: Uuid) -> Result<DispatchOutcome, EngineError> {
        self.dispatcher.send_bulk_email(email_id).await
    }

    pub fn queue_metrics(&self) -> QueueMetrics {
        let depth = self.queue.depth();
        QueueMetrics {
            pending: depth.pending,
            processing: depth.processing,
            rate_limit: self.limiter.snapshot(),
            provider: self.transport.provider_name(),
        }
    }

    /// Spawn the queue processor and scheduled sweeper loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MailError::Internal(format!("no Tokio runtime: {}", e)))?;

        let (shutdown, rx) = watch::channel(false);
        let processor = self.spawn_processor(&runtime, rx.clone());
        let sweeper = self.spawn_sweeper(&runtime, rx);

        tracing::info!(
            provider = self.transport.provider_name(),
            process_interval = ?self.profile.process_interval,
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "Bulk mailer started"
        );

        *running = Some(Running {
            shutdown,
            handles: vec![processor, sweeper],
        });
        Ok(())
    }

    fn spawn_processor(
        &self,
        runtime: &tokio::runtime::Handle,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        let period = self.profile.process_interval;
        runtime.spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = processor.tick().await {
                            tracing::error!(error = %e, "Queue processor tick failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Queue processor stopped");
        })
    }

    fn spawn_sweeper(
        &self,
        runtime: &tokio::runtime::Handle,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let sweeper = Arc::clone(&self.sweeper);
        let period = self.config.sweep_interval;
        runtime.spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = timer.tick() => match sweeper.run_once().await {
                        Ok(report) if !report.is_empty() => tracing::info!(
                            dispatched = report.dispatched.len(),
                            failed = report.failed.len(),
                            errors = report.errors.len(),
                            "Scheduled sweep finished"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Scheduled sweep failed"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Scheduled sweeper stopped");
        })
    }

    /// Stop both loops and wait for them to exit. A batch being processed
    /// finishes its current tick first.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for handle in running.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background loop ended abnormally");
            }
        }
        tracing::info!("Bulk mailer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn EmailStore> {
        &self.store
    }

    /// The processor, for driving ticks by hand.
    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.processor
    }

    /// The sweeper, for running sweeps by hand.
    pub fn sweeper(&self) -> &Arc<ScheduledDispatchSweeper> {
        &self.sweeper
    }

    pub fn reconciler(&self) -> &Arc<StatusReconciler> {
        &self.reconciler
    }
}

/// Drop repeated addresses (case-insensitive), keeping the first.
fn dedup(resolved: Vec<ResolvedRecipient>) -> Vec<ResolvedRecipient> {
    let mut seen = HashSet::new();
    resolved
        .into_iter()
        .filter(|r| {
            let key = r.address.dedup_key();
            if key.is_empty() {
                tracing::debug!(contact_id = ?r.contact_id, "Skipping recipient without address");
                return false;
            }
            seen.insert(key)
        })
        .collect()
}
