//! The queue processor: one batch job per tick.
//!
//! A job moves through these states:
//!
//! ```text
//! Pending -> Selected -> InFlight -> Completed        (removed, email reconciled)
//!                                 -> RequeuedPartial  (rest of the batch under a new ID)
//!                                 -> RetryScheduled   (same ID, later scheduled_at)
//!                                 -> Abandoned        (remaining recipients failed)
//! ```
//!
//! Recipients are sent sequentially. A rejected recipient is marked failed and
//! the batch moves on. Only a batch-fatal error stops the batch and goes
//! through the [`RetryPolicy`]; see
//! [`MailError::is_batch_fatal`](crate::MailError::is_batch_fatal).

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::address::Address;
use crate::error::EngineError;
use crate::message::OutgoingMessage;
use crate::model::Recipient;
use crate::queue::{BatchJob, DeliveryQueue, JobId, UnrecordedSend};
use crate::rate_limit::RateLimiter;
use crate::reconcile::StatusReconciler;
use crate::retry::{RetryDecision, RetryPolicy, MAX_RETRIES_EXCEEDED};
use crate::store::EmailStore;
use crate::transport::Transport;

/// Delay before a job cut short by the rate limiter becomes eligible again.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

/// Header carrying the bulk email ID on every outgoing message.
pub const EMAIL_ID_HEADER: &str = "X-Mailshot-Email-Id";

/// What one call to [`QueueProcessor::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The queue was empty.
    Idle,
    /// The rate limiter refused before a job was picked.
    RateLimited,
    /// Jobs exist but none is due.
    NothingEligible,
    /// Every recipient of the job was attempted; the job is gone.
    Completed { job_id: JobId, sent: u32, failed: u32 },
    /// The job stopped early (rate limit or tick budget) and the rest of its
    /// recipients were requeued as `requeued`.
    Deferred {
        job_id: JobId,
        requeued: JobId,
        attempted: usize,
    },
    /// A batch-level failure; the job runs again after `delay`.
    Retried {
        job_id: JobId,
        retry_count: u32,
        delay: Duration,
    },
    /// Retries ran out; `failed` recipients were marked failed.
    Abandoned { job_id: JobId, failed: u32 },
}

/// Result of walking a job's recipients.
enum BatchRun {
    Finished { sent: u32, failed: u32 },
    Stopped { attempted: usize, retry_at: Instant },
    Faulted {
        attempted: usize,
        error: String,
        unrecorded: Vec<UnrecordedSend>,
    },
}

/// Drains the [`DeliveryQueue`] one job at a time.
pub struct QueueProcessor {
    queue: Arc<DeliveryQueue>,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn EmailStore>,
    reconciler: Arc<StatusReconciler>,
    retry: RetryPolicy,
    from: Address,
    tick_budget: Duration,
}

impl QueueProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<DeliveryQueue>,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn EmailStore>,
        reconciler: Arc<StatusReconciler>,
        retry: RetryPolicy,
        from: Address,
        tick_budget: Duration,
    ) -> Self {
        Self {
            queue,
            limiter,
            transport,
            store,
            reconciler,
            retry,
            from,
            tick_budget,
        }
    }

    /// Run one tick: pick the oldest due job and process it to an outcome.
    pub async fn tick(&self) -> Result<TickOutcome, EngineError> {
        if self.queue.is_empty() {
            return Ok(TickOutcome::Idle);
        }
        if !self.limiter.can_send() {
            tracing::debug!("Rate limit reached, waiting for next tick");
            return Ok(TickOutcome::RateLimited);
        }
        let Some(job) = self.queue.claim_next(Instant::now()) else {
            return Ok(TickOutcome::NothingEligible);
        };

        let span = tracing::info_span!(
            "mailshot.batch",
            email_id = %job.email_id,
            job_id = %job.id,
            batch = job.batch_index,
            recipients = job.len(),
            retry_count = job.retry_count,
            provider = self.transport.provider_name(),
        );
        self.process(job).instrument(span).await
    }

    /// Tick until the queue holds nothing that is due right now.
    ///
    /// Stops early on a rate-limit refusal. Returns the outcomes in order.
    pub async fn drain(&self) -> Result<Vec<TickOutcome>, EngineError> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.tick().await?;
            match outcome {
                TickOutcome::Idle | TickOutcome::NothingEligible | TickOutcome::RateLimited => {
                    outcomes.push(outcome);
                    return Ok(outcomes);
                }
                other => outcomes.push(other),
            }
        }
    }

    async fn process(&self, job: BatchJob) -> Result<TickOutcome, EngineError> {
        tracing::debug!("Processing batch");

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let run = match self.transport.validate_config() {
            Ok(()) => self.send_all(&job).await,
            Err(e) => BatchRun::Faulted {
                attempted: 0,
                error: e.to_string(),
                unrecorded: job.unrecorded.clone(),
            },
        };

        let outcome = match run {
            BatchRun::Finished { sent, failed } => {
                self.queue.complete(&job.id);
                tracing::info!(sent, failed, "Batch completed");
                self.reconciler.reconcile(job.email_id).await?;
                TickOutcome::Completed {
                    job_id: job.id,
                    sent,
                    failed,
                }
            }
            BatchRun::Stopped {
                attempted,
                retry_at,
            } => match self.queue.requeue_remainder(&job.id, attempted, retry_at) {
                Some(requeued) => {
                    tracing::info!(attempted, requeued = %requeued, "Batch cut short, remainder requeued");
                    TickOutcome::Deferred {
                        job_id: job.id,
                        requeued,
                        attempted,
                    }
                }
                None => {
                    self.reconciler.reconcile(job.email_id).await?;
                    TickOutcome::Completed {
                        job_id: job.id,
                        sent: 0,
                        failed: 0,
                    }
                }
            },
            BatchRun::Faulted {
                attempted,
                error,
                unrecorded,
            } => {
                self.handle_batch_failure(&job, attempted, &error, unrecorded)
                    .await?
            }
        };

        #[cfg(feature = "metrics")]
        {
            let label = match &outcome {
                TickOutcome::Completed { .. } => "completed",
                TickOutcome::Deferred { .. } => "deferred",
                TickOutcome::Retried { .. } => "retried",
                TickOutcome::Abandoned { .. } => "abandoned",
                _ => "idle",
            };
            metrics::counter!("mailshot_batches_total", "outcome" => label).increment(1);
            metrics::histogram!("mailshot_batch_duration_seconds")
                .record(started.elapsed().as_secs_f64());
        }

        Ok(outcome)
    }

    async fn send_all(&self, job: &BatchJob) -> BatchRun {
        let started = Instant::now();
        let delay = job.profile.per_email_delay;
        let mut sent = match self.record_unrecorded(&job.unrecorded).await {
            Ok(n) => n,
            Err(e) => {
                return BatchRun::Faulted {
                    attempted: 0,
                    error: e.to_string(),
                    unrecorded: job.unrecorded.clone(),
                }
            }
        };
        let mut failed = 0u32;

        for (attempted, recipient) in job.recipients().iter().enumerate() {
            if !self.limiter.can_send() {
                tracing::warn!(attempted, "Rate limit exhausted mid-batch");
                return BatchRun::Stopped {
                    attempted,
                    retry_at: Instant::now() + RATE_LIMIT_BACKOFF,
                };
            }
            if attempted > 0 && started.elapsed() >= self.tick_budget {
                tracing::debug!(attempted, "Tick budget spent, yielding");
                return BatchRun::Stopped {
                    attempted,
                    retry_at: Instant::now(),
                };
            }

            let message = self.build_message(job, recipient);
            match self.transport.send(&message).await {
                Ok(receipt) => {
                    self.limiter.record_send();
                    tracing::debug!(
                        to = %recipient.address.email,
                        message_id = %receipt.message_id,
                        preview = receipt.preview_url.as_deref(),
                        "Recipient sent"
                    );
                    let sent_at = Utc::now();
                    if let Err(e) = self.store.mark_recipient_sent(recipient.id, sent_at).await {
                        tracing::warn!(
                            to = %recipient.address.email,
                            error = %e,
                            "Sent but not recorded, holding outcome on the job"
                        );
                        return BatchRun::Faulted {
                            attempted: attempted + 1,
                            error: e.to_string(),
                            unrecorded: vec![UnrecordedSend {
                                recipient_id: recipient.id,
                                sent_at,
                            }],
                        };
                    }
                    sent += 1;
                    record_recipient("sent");
                }
                Err(e) if e.is_batch_fatal() => {
                    return BatchRun::Faulted {
                        attempted,
                        error: e.to_string(),
                        unrecorded: Vec::new(),
                    };
                }
                Err(e) => {
                    tracing::debug!(to = %recipient.address.email, error = %e, "Recipient failed");
                    if let Err(store_err) = self
                        .store
                        .mark_recipient_failed(recipient.id, &e.to_string())
                        .await
                    {
                        return BatchRun::Faulted {
                            attempted,
                            error: store_err.to_string(),
                            unrecorded: Vec::new(),
                        };
                    }
                    failed += 1;
                    record_recipient("failed");
                }
            }

            if !delay.is_zero() && attempted + 1 < job.len() {
                tokio::time::sleep(delay).await;
            }
        }

        BatchRun::Finished { sent, failed }
    }

    /// Write sends a previous attempt could not record.
    async fn record_unrecorded(&self, sends: &[UnrecordedSend]) -> Result<u32, EngineError> {
        for send in sends {
            self.store
                .mark_recipient_sent(send.recipient_id, send.sent_at)
                .await?;
            record_recipient("sent");
        }
        if !sends.is_empty() {
            tracing::info!(recorded = sends.len(), "Recorded sends from previous attempt");
        }
        Ok(u32::try_from(sends.len()).unwrap_or(u32::MAX))
    }

    fn build_message(&self, job: &BatchJob, recipient: &Recipient) -> OutgoingMessage {
        let content = &job.content;
        let mut message = OutgoingMessage::new(&recipient.address)
            .from(&self.from)
            .subject(content.subject.as_str())
            .html_body(content.html_body.as_str())
            .text_body(content.text_body.as_str())
            .attachments(content.attachments.clone())
            .header(EMAIL_ID_HEADER, job.email_id.to_string());
        if let Some(reply_to) = &content.reply_to {
            message = message.reply_to(reply_to);
        }
        message
    }

    async fn handle_batch_failure(
        &self,
        job: &BatchJob,
        attempted: usize,
        error: &str,
        unrecorded: Vec<UnrecordedSend>,
    ) -> Result<TickOutcome, EngineError> {
        match self.retry.decide(job.retry_count) {
            RetryDecision::Retry { retry_count, delay } => {
                self.queue.hold_unrecorded(&job.id, unrecorded);
                self.queue
                    .reschedule(&job.id, attempted, Instant::now() + delay);
                tracing::warn!(error, retry_count, ?delay, "Batch failed, retry scheduled");
                Ok(TickOutcome::Retried {
                    job_id: job.id.clone(),
                    retry_count,
                    delay,
                })
            }
            RetryDecision::Exhausted => {
                let remaining: Vec<Uuid> = job.recipients()[attempted.min(job.len())..]
                    .iter()
                    .map(|r| r.id)
                    .collect();
                let (failed, unwritten) = match self.record_unrecorded(&unrecorded).await {
                    Ok(_) => (
                        self.store.fail_pending(&remaining, MAX_RETRIES_EXCEEDED).await,
                        Vec::new(),
                    ),
                    Err(e) => (Err(e), unrecorded),
                };
                let failed = match failed {
                    Ok(n) => n,
                    Err(e) => {
                        // Attempted recipients stay dropped and the job runs again.
                        self.queue.hold_unrecorded(&job.id, unwritten);
                        self.queue.reschedule(&job.id, attempted, Instant::now());
                        return Err(e);
                    }
                };
                self.queue.complete(&job.id);
                tracing::error!(error, failed, "Batch abandoned after max retries");
                for _ in 0..failed {
                    record_recipient("failed");
                }
                self.reconciler.reconcile(job.email_id).await?;
                Ok(TickOutcome::Abandoned {
                    job_id: job.id.clone(),
                    failed,
                })
            }
        }
    }
}

#[cfg(feature = "metrics")]
fn record_recipient(status: &'static str) {
    metrics::counter!("mailshot_recipients_total", "status" => status).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_recipient(_status: &'static str) {}
