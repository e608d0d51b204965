//! End-to-end tests for the bulk mailer.
//!
//! Every test drives the processor by hand (or through `start`) against a
//! `LocalTransport` and a `MemoryEmailStore`.

#![cfg(feature = "local")]

use std::sync::Arc;
use std::time::Duration;

use mailshot::testing::*;
use mailshot::{
    Address, BulkMailer, ComposeRequest, DispatchOutcome, EmailStatus, EmailStore, EngineConfig,
    EngineError, MailError, MemoryEmailStore, NoAttachments, ProviderProfile, RecipientSelection,
    RecipientStatus, Reconciliation, StaticResolver, TickOutcome, MAX_RETRIES_EXCEEDED,
};
use mailshot::providers::LocalTransport;
use uuid::Uuid;

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
    mailer: BulkMailer,
    transport: LocalTransport,
    store: Arc<MemoryEmailStore>,
}

fn fixture(config: EngineConfig) -> Fixture {
    let transport = LocalTransport::new();
    let store = MemoryEmailStore::shared();
    let mailer = BulkMailer::new(
        config,
        Arc::new(transport.clone()),
        store.clone(),
        Arc::new(StaticResolver::new()),
        Arc::new(NoAttachments),
    )
    .unwrap();
    Fixture {
        mailer,
        transport,
        store,
    }
}

fn config() -> EngineConfig {
    EngineConfig::new().from(("Riverside FC", "noreply@riverside.example"))
}

fn addresses(n: usize) -> RecipientSelection {
    RecipientSelection::Addresses {
        addresses: (1..=n)
            .map(|i| Address::new(format!("member{}@riverside.example", i)))
            .collect(),
    }
}

fn request(n: usize) -> ComposeRequest {
    ComposeRequest::new(
        "Season kick-off",
        "<h1>Kick-off</h1><p>First match on <b>Saturday</b>.</p>",
        addresses(n),
    )
}

async fn compose(f: &Fixture, req: ComposeRequest) -> Uuid {
    f.mailer
        .compose_and_send(Uuid::new_v4(), Uuid::new_v4(), req)
        .await
        .unwrap()
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn new_requires_sender() {
    std::env::remove_var("EMAIL_FROM");
    let result = BulkMailer::new(
        EngineConfig::new(),
        Arc::new(LocalTransport::new()),
        MemoryEmailStore::shared(),
        Arc::new(StaticResolver::new()),
        Arc::new(NoAttachments),
    );
    assert!(matches!(
        result,
        Err(EngineError::Transport(MailError::MissingField("from")))
    ));
}

#[test]
fn local_transport_gets_permissive_profile() {
    let f = fixture(config());
    assert_eq!(*f.mailer.profile(), ProviderProfile::PERMISSIVE);

    let f = Fixture {
        mailer: f.mailer.with_profile(ProviderProfile::CONSERVATIVE).unwrap(),
        ..f
    };
    assert_eq!(*f.mailer.profile(), ProviderProfile::CONSERVATIVE);
    assert!(f.mailer.queue_metrics().rate_limit.enabled);
}

// ============================================================================
// Compose
// ============================================================================

#[tokio::test]
async fn compose_with_no_recipients_persists_nothing() {
    let f = fixture(config());

    let result = f
        .mailer
        .compose_and_send(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ComposeRequest::new("Hello", "<p>Hi</p>", RecipientSelection::All),
        )
        .await;

    assert!(matches!(result, Err(EngineError::NoRecipients)));
    assert_eq!(f.store.email_count(), 0);
    assert!(f.mailer.queue().is_empty());
}

#[tokio::test]
async fn compose_derives_text_body_and_dedups() {
    let f = fixture(config().reply_to("office@riverside.example"));
    let selection = RecipientSelection::Addresses {
        addresses: vec![
            Address::new("coach@riverside.example"),
            Address::new("Coach@Riverside.example"),
            Address::new("captain@riverside.example"),
        ],
    };

    let id = compose(&f, ComposeRequest::new("Kit", "<p>Bring <b>boots</b></p>", selection)).await;

    let email = f.store.email(id).unwrap();
    assert_eq!(email.total_recipients, 2);
    assert_eq!(email.text_body, "Bring boots");
    assert_eq!(email.status, EmailStatus::Sending);
    assert_eq!(email.reply_to.unwrap().email, "office@riverside.example");
    assert_eq!(f.store.recipients(id).len(), 2);
}

// ============================================================================
// Delivery Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_250_recipients_three_batches_all_sent() {
    let f = fixture(config());
    let id = compose(&f, request(250)).await;

    let sizes: Vec<usize> = f.mailer.queue().jobs_for(id).iter().map(|j| j.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);

    let outcomes = f.mailer.processor().drain().await.unwrap();
    assert_eq!(outcomes.len(), 4);

    assert_sent_count(&f.transport, 250);
    assert_email_status(&f.store, id, EmailStatus::Sent);
    let email = f.store.email(id).unwrap();
    assert_eq!(email.successful_deliveries, 250);
    assert_eq!(email.failed_deliveries, 0);
    assert!(email.sent_at.is_some());
    assert_subject_matches(&f.transport, "^Season kick-off$");
}

#[tokio::test]
async fn scenario_two_rejections_end_partial() {
    let f = fixture(config());
    f.transport.fail_for("member3@riverside.example", "550 mailbox unavailable");
    f.transport.fail_for("member7@riverside.example", "550 mailbox unavailable");

    let id = compose(&f, request(10)).await;
    f.mailer.processor().drain().await.unwrap();

    assert_email_status(&f.store, id, EmailStatus::Partial);
    let email = f.store.email(id).unwrap();
    assert_eq!(email.successful_deliveries, 8);
    assert_eq!(email.failed_deliveries, 2);

    refute_sent_to(&f.transport, "member3@riverside.example");
    assert_sent_to(&f.transport, "member4@riverside.example");
    assert_recipient_status(&f.store, id, "member7@riverside.example", RecipientStatus::Failed);
    assert_recipient_status(&f.store, id, "member8@riverside.example", RecipientStatus::Sent);
}

#[tokio::test]
async fn every_recipient_rejected_ends_failed() {
    let f = fixture(config());
    for i in 1..=3 {
        f.transport
            .fail_for(&format!("member{}@riverside.example", i), "rejected");
    }

    let id = compose(&f, request(3)).await;
    f.mailer.processor().drain().await.unwrap();

    assert_email_status(&f.store, id, EmailStatus::Failed);
    assert_sent_count(&f.transport, 0);
}

#[tokio::test]
async fn outgoing_messages_carry_sender_and_bodies() {
    let f = fixture(config());
    let id = compose(&f, request(1).reply_to("coach@riverside.example")).await;
    f.mailer.processor().drain().await.unwrap();

    let sent = f.transport.messages();
    let message = &sent[0].message;
    assert_eq!(message.from.as_ref().unwrap().name.as_deref(), Some("Riverside FC"));
    assert_eq!(message.reply_to.as_ref().unwrap().email, "coach@riverside.example");
    assert!(message.html_body.as_deref().unwrap().contains("<b>Saturday</b>"));
    assert!(message.text_body.as_deref().unwrap().contains("First match on Saturday."));
    assert_eq!(
        message.headers.get(mailshot::EMAIL_ID_HEADER),
        Some(&id.to_string())
    );
}

// ============================================================================
// Retry & Backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn batch_failing_past_max_retries_is_abandoned() {
    let f = fixture(config());
    f.transport.set_unreachable("connection refused");
    let id = compose(&f, request(4)).await;
    let processor = f.mailer.processor();

    let mut retries = 0;
    loop {
        match processor.tick().await.unwrap() {
            TickOutcome::Retried { delay, .. } => {
                retries += 1;
                tokio::time::advance(delay).await;
            }
            TickOutcome::Abandoned { failed, .. } => {
                assert_eq!(failed, 4);
                break;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(retries, 3);
    assert_eq!(f.transport.attempt_count(), 4);
    assert!(f.mailer.queue().is_empty());
    assert_email_status(&f.store, id, EmailStatus::Failed);
    assert!(f
        .store
        .recipients(id)
        .iter()
        .all(|r| r.status == RecipientStatus::Failed
            && r.error.as_deref() == Some(MAX_RETRIES_EXCEEDED)));
}

#[tokio::test(start_paused = true)]
async fn transient_outage_recovers_without_resending() {
    let f = fixture(config());
    let id = compose(&f, request(3)).await;
    f.transport.unreachable_for(2);

    assert!(matches!(
        f.mailer.processor().tick().await.unwrap(),
        TickOutcome::Retried { retry_count: 1, .. }
    ));
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(matches!(
        f.mailer.processor().tick().await.unwrap(),
        TickOutcome::Retried { retry_count: 2, .. }
    ));
    tokio::time::advance(Duration::from_secs(5)).await;
    f.mailer.processor().drain().await.unwrap();

    assert_sent_count(&f.transport, 3);
    assert_email_status(&f.store, id, EmailStatus::Sent);
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rate_limited_batch_leaves_rest_pending() {
    let f = fixture(config());
    let f = Fixture {
        mailer: f
            .mailer
            .with_profile(
                ProviderProfile::CONSERVATIVE
                    .with_max_per_second(3)
                    .with_per_email_delay(Duration::ZERO),
            )
            .unwrap(),
        ..f
    };
    let id = compose(&f, request(7)).await;

    let outcomes = f.mailer.processor().drain().await.unwrap();
    assert!(matches!(outcomes[0], TickOutcome::Deferred { attempted: 3, .. }));
    assert_eq!(outcomes.last(), Some(&TickOutcome::RateLimited));

    let counts = f.store.status_counts(id).await.unwrap();
    assert_eq!((counts.sent, counts.failed, counts.pending), (3, 0, 4));
    assert_email_status(&f.store, id, EmailStatus::Sending);

    while !f.mailer.queue().is_empty() {
        tokio::time::advance(Duration::from_secs(1)).await;
        f.mailer.processor().drain().await.unwrap();
    }

    assert_sent_count(&f.transport, 7);
    assert_email_status(&f.store, id, EmailStatus::Sent);
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn send_bulk_email_and_reconcile_are_idempotent() {
    let f = fixture(config());
    let id = compose(&f, request(5)).await;

    assert_eq!(
        f.mailer.send_bulk_email(id).await.unwrap(),
        DispatchOutcome::AlreadyQueued
    );
    assert_eq!(f.mailer.queue().len(), 1);

    f.mailer.processor().drain().await.unwrap();
    let finalized = f.store.email(id).unwrap();

    assert_eq!(
        f.mailer.send_bulk_email(id).await.unwrap(),
        DispatchOutcome::NothingPending
    );
    assert!(matches!(
        f.mailer.reconciler().reconcile(id).await.unwrap(),
        Reconciliation::Unchanged(_)
    ));

    let again = f.store.email(id).unwrap();
    assert_eq!(again.status, finalized.status);
    assert_eq!(again.sent_at, finalized.sent_at);
    assert_sent_count(&f.transport, 5);
}

// ============================================================================
// Metrics & Lifecycle
// ============================================================================

#[tokio::test]
async fn queue_metrics_reflect_queue() {
    let f = fixture(config().batch_size(2));
    compose(&f, request(5)).await;

    let metrics = f.mailer.queue_metrics();
    assert_eq!(metrics.pending, 3);
    assert_eq!(metrics.processing, 0);
    assert_eq!(metrics.provider, "local");
    assert!(!metrics.rate_limit.enabled);

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["pending"], 3);
}

#[tokio::test(start_paused = true)]
async fn background_loops_deliver_until_stopped() {
    let f = fixture(config());
    f.mailer.start().unwrap();
    assert!(matches!(f.mailer.start(), Err(EngineError::AlreadyRunning)));

    let id = compose(&f, request(120)).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_email_status(&f.store, id, EmailStatus::Sent);
    assert_sent_count(&f.transport, 120);

    f.mailer.stop().await;
    assert!(!f.mailer.is_running());

    let later = compose(&f, request(1)).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_email_status(&f.store, later, EmailStatus::Sending);
    assert_eq!(f.mailer.queue().len(), 1);
}
