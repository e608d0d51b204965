//! Delivery queue tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mailshot::{
    DeliveryQueue, MessageSnapshot, ProviderProfile, Recipient, ResolvedRecipient,
    DEFAULT_BATCH_SIZE,
};
use tokio::time::Instant;
use uuid::Uuid;

fn recipients(email_id: Uuid, n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| Recipient::pending(email_id, ResolvedRecipient::new(format!("r{}@x.org", i), "member")))
        .collect()
}

fn content() -> Arc<MessageSnapshot> {
    Arc::new(MessageSnapshot {
        subject: "Subject".into(),
        html_body: "<p>Body</p>".into(),
        text_body: "Body".into(),
        reply_to: None,
        attachments: Vec::new(),
    })
}

// ============================================================================
// Partitioning
// ============================================================================

#[test]
fn batches_concatenate_to_input() {
    let cases = [1, 4, 7, 10, 100, DEFAULT_BATCH_SIZE + 1]
        .into_iter()
        .flat_map(|size| (0..=301).map(move |n| (n, size)));
    for (n, size) in cases {
        let queue = DeliveryQueue::new(size, ProviderProfile::PERMISSIVE);
        let email_id = Uuid::new_v4();
        let input = recipients(email_id, n);
        let expected: Vec<Uuid> = input.iter().map(|r| r.id).collect();

        let ids = queue.enqueue(email_id, input, content());
        let jobs = queue.jobs_for(email_id);
        assert_eq!(ids.len(), jobs.len());
        assert_eq!(jobs.len(), n.div_ceil(size));

        let flattened: Vec<Uuid> = jobs
            .iter()
            .flat_map(|j| j.recipients().iter().map(|r| r.id))
            .collect();
        assert_eq!(flattened, expected, "n={} size={}", n, size);

        if let Some((last, full)) = jobs.split_last() {
            assert!(full.iter().all(|j| j.len() == size));
            assert!(!last.is_empty() && last.len() <= size);
        }
        assert!(jobs.iter().all(|j| j.retry_count == 0));
    }
}

#[test]
fn default_batch_size_is_100() {
    assert_eq!(DEFAULT_BATCH_SIZE, 100);
    assert_eq!(DeliveryQueue::new(0, ProviderProfile::PERMISSIVE).batch_size(), 1);
}

#[test]
fn job_ids_unique_across_emails() {
    let queue = DeliveryQueue::new(10, ProviderProfile::PERMISSIVE);
    let mut all = HashSet::new();
    for _ in 0..5 {
        let id = Uuid::new_v4();
        for job in queue.enqueue(id, recipients(id, 30), content()) {
            assert!(job.as_str().starts_with(&id.simple().to_string()));
            assert!(all.insert(job));
        }
    }
    assert_eq!(all.len(), 15);
}

// ============================================================================
// Requeue & Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn remainder_and_retry_never_duplicate_recipients() {
    let queue = DeliveryQueue::new(6, ProviderProfile::PERMISSIVE);
    let email_id = Uuid::new_v4();
    let input = recipients(email_id, 6);
    let all: Vec<Uuid> = input.iter().map(|r| r.id).collect();
    queue.enqueue(email_id, input, content());

    let job = queue.claim_next(Instant::now()).unwrap();
    let rest = queue
        .requeue_remainder(&job.id, 2, Instant::now() + Duration::from_secs(1))
        .unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    let job = queue.claim_next(Instant::now()).unwrap();
    assert_eq!(job.id, rest);

    let retried = queue
        .reschedule(&job.id, 1, Instant::now() + Duration::from_secs(5))
        .unwrap();
    let left: Vec<Uuid> = retried.recipients().iter().map(|r| r.id).collect();
    assert_eq!(left, all[3..].to_vec());
    assert_eq!(retried.retry_count, 1);
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn selection_is_fifo_among_due_jobs() {
    let queue = DeliveryQueue::new(1, ProviderProfile::PERMISSIVE);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    queue.enqueue(a, recipients(a, 2), content());
    queue.enqueue(b, recipients(b, 1), content());

    let first = queue.claim_next(Instant::now()).unwrap();
    queue.reschedule(&first.id, 0, Instant::now() + Duration::from_secs(1));

    let order: Vec<(Uuid, usize)> = std::iter::from_fn(|| {
        let job = queue.claim_next(Instant::now())?;
        queue.complete(&job.id);
        Some((job.email_id, job.batch_index))
    })
    .collect();
    assert_eq!(order, vec![(a, 1), (b, 0)]);

    tokio::time::advance(Duration::from_secs(1)).await;
    let retried = queue.claim_next(Instant::now()).unwrap();
    assert_eq!((retried.email_id, retried.batch_index), (a, 0));
}
