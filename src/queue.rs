//! In-memory delivery queue of batch jobs.
//!
//! A bulk email's recipients are split into fixed-size batches. Every batch of
//! one enqueue shares a single `Arc<[Recipient]>` arena and addresses its slice
//! by index range, so requeueing "the rest of a batch" is an offset change,
//! never a copy of recipient rows.
//!
//! The queue is the single owner of job state. All access goes through one
//! mutex; callers get clones of jobs (two `Arc`s and a range, plus any
//! unrecorded sends) and report outcomes back with [`DeliveryQueue::complete`],
//! [`DeliveryQueue::requeue_remainder`] and [`DeliveryQueue::reschedule`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::address::Address;
use crate::attachment::Attachment;
use crate::model::Recipient;
use crate::profile::ProviderProfile;

/// Default number of recipients per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Identifier of one batch job.
///
/// Minted from the owning email, the batch index and a random component, so
/// it is unique per email + batch + creation. A requeued remainder gets a new ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    fn mint(email_id: Uuid, batch_index: usize) -> Self {
        Self(format!(
            "{}-{}-{}",
            email_id.simple(),
            batch_index,
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subject/body/attachment snapshot shared by every batch of one email.
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub reply_to: Option<Address>,
    pub attachments: Vec<Attachment>,
}

/// A send the transport accepted but the store failed to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrecordedSend {
    pub recipient_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

/// A unit of delivery work: a slice of one email's recipients.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: JobId,
    pub email_id: Uuid,
    pub batch_index: usize,
    arena: Arc<[Recipient]>,
    range: Range<usize>,
    pub content: Arc<MessageSnapshot>,
    /// Rate-limit settings in force when the job was created.
    pub profile: ProviderProfile,
    pub retry_count: u32,
    /// Sends already made for recipients outside `recipients()` whose outcome
    /// still has to be written before this job sends anything else.
    pub unrecorded: Vec<UnrecordedSend>,
    /// Earliest time the processor may pick this job.
    pub scheduled_at: Instant,
    pub created_at: DateTime<Utc>,
    seq: u64,
}

impl BatchJob {
    /// Recipients still to attempt, in assignment order.
    pub fn recipients(&self) -> &[Recipient] {
        &self.arena[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Whether the processor may pick this job at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.scheduled_at <= now
    }

    /// A new job for everything after the first `attempted` recipients.
    fn remainder(&self, attempted: usize, scheduled_at: Instant) -> Self {
        let start = (self.range.start + attempted).min(self.range.end);
        Self {
            id: JobId::mint(self.email_id, self.batch_index),
            email_id: self.email_id,
            batch_index: self.batch_index,
            arena: Arc::clone(&self.arena),
            range: start..self.range.end,
            content: Arc::clone(&self.content),
            profile: self.profile,
            retry_count: self.retry_count,
            unrecorded: Vec::new(),
            scheduled_at,
            created_at: Utc::now(),
            seq: 0,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, BatchJob>,
    in_flight: HashSet<JobId>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, mut job: BatchJob) -> JobId {
        job.seq = self.next_seq;
        self.next_seq += 1;
        let id = job.id.clone();
        self.jobs.insert(id.clone(), job);
        id
    }
}

/// Counts for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Jobs waiting to run (due or not).
    pub pending: usize,
    /// Jobs currently being processed.
    pub processing: usize,
}

/// Process-local queue of pending and in-flight batch jobs.
#[derive(Debug)]
pub struct DeliveryQueue {
    batch_size: usize,
    profile: ProviderProfile,
    state: Mutex<QueueState>,
}

impl DeliveryQueue {
    /// Create a queue that splits emails into batches of `batch_size`.
    pub fn new(batch_size: usize, profile: ProviderProfile) -> Self {
        Self {
            batch_size: batch_size.max(1),
            profile,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Partition recipients into batch jobs without touching the queue.
    ///
    /// Input order is preserved; every batch holds `batch_size` recipients
    /// except possibly the last. All jobs are due immediately.
    pub fn split(
        &self,
        email_id: Uuid,
        recipients: Vec<Recipient>,
        content: Arc<MessageSnapshot>,
    ) -> Vec<BatchJob> {
        let arena: Arc<[Recipient]> = recipients.into();
        let now = Instant::now();
        let created_at = Utc::now();

        (0..arena.len())
            .step_by(self.batch_size)
            .enumerate()
            .map(|(batch_index, start)| BatchJob {
                id: JobId::mint(email_id, batch_index),
                email_id,
                batch_index,
                arena: Arc::clone(&arena),
                range: start..(start + self.batch_size).min(arena.len()),
                content: Arc::clone(&content),
                profile: self.profile,
                retry_count: 0,
                unrecorded: Vec::new(),
                scheduled_at: now,
                created_at,
                seq: 0,
            })
            .collect()
    }

    /// Split recipients into batches and insert them all. Returns the new job IDs.
    pub fn enqueue(
        &self,
        email_id: Uuid,
        recipients: Vec<Recipient>,
        content: Arc<MessageSnapshot>,
    ) -> Vec<JobId> {
        let jobs = self.split(email_id, recipients, content);
        let mut state = self.state.lock();
        jobs.into_iter().map(|job| state.insert(job)).collect()
    }

    /// Insert a single job.
    pub fn insert(&self, job: BatchJob) -> JobId {
        self.state.lock().insert(job)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Pending vs. in-flight job counts.
    pub fn depth(&self) -> QueueDepth {
        let state = self.state.lock();
        QueueDepth {
            pending: state.jobs.len() - state.in_flight.len(),
            processing: state.in_flight.len(),
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.state.lock().jobs.contains_key(id)
    }

    pub fn is_in_flight(&self, id: &JobId) -> bool {
        self.state.lock().in_flight.contains(id)
    }

    /// Snapshot of a queued job.
    pub fn get(&self, id: &JobId) -> Option<BatchJob> {
        self.state.lock().jobs.get(id).cloned()
    }

    /// Whether any job (pending or in flight) belongs to `email_id`.
    pub fn has_jobs_for(&self, email_id: Uuid) -> bool {
        self.state
            .lock()
            .jobs
            .values()
            .any(|job| job.email_id == email_id)
    }

    /// Jobs belonging to `email_id`, in queue order.
    pub fn jobs_for(&self, email_id: Uuid) -> Vec<BatchJob> {
        let state = self.state.lock();
        let mut jobs: Vec<BatchJob> = state
            .jobs
            .values()
            .filter(|job| job.email_id == email_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    /// Pick the oldest due job that is not in flight and mark it in flight.
    pub fn claim_next(&self, now: Instant) -> Option<BatchJob> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .values()
            .filter(|job| job.is_due(now) && !state.in_flight.contains(&job.id))
            .min_by_key(|job| job.seq)
            .cloned()?;
        state.in_flight.insert(job.id.clone());
        Some(job)
    }

    /// Remove a job that finished (or was abandoned).
    pub fn complete(&self, id: &JobId) -> Option<BatchJob> {
        let mut state = self.state.lock();
        state.in_flight.remove(id);
        state.jobs.remove(id)
    }

    /// Replace a job with a new one covering its recipients after the first
    /// `attempted`, eligible at `scheduled_at`. Returns the new job's ID.
    ///
    /// Nothing is requeued when every recipient was attempted.
    pub fn requeue_remainder(
        &self,
        id: &JobId,
        attempted: usize,
        scheduled_at: Instant,
    ) -> Option<JobId> {
        let mut state = self.state.lock();
        state.in_flight.remove(id);
        let job = state.jobs.remove(id)?;
        let rest = job.remainder(attempted, scheduled_at);
        if rest.is_empty() {
            return None;
        }
        Some(state.insert(rest))
    }

    /// Keep a failed job for another attempt.
    ///
    /// The first `attempted` recipients already have an outcome and are
    /// dropped from the job; the retry count is bumped and the job becomes
    /// eligible again at `scheduled_at`. The job keeps its ID.
    pub fn reschedule(
        &self,
        id: &JobId,
        attempted: usize,
        scheduled_at: Instant,
    ) -> Option<BatchJob> {
        let mut state = self.state.lock();
        state.in_flight.remove(id);
        let job = state.jobs.get_mut(id)?;
        job.range.start = (job.range.start + attempted).min(job.range.end);
        job.retry_count += 1;
        job.scheduled_at = scheduled_at;
        Some(job.clone())
    }

    /// Replace the sends a job still has to record.
    pub fn hold_unrecorded(&self, id: &JobId, sends: Vec<UnrecordedSend>) {
        if let Some(job) = self.state.lock().jobs.get_mut(id) {
            job.unrecorded = sends;
        }
    }
}
