//! Testing utilities and assertion helpers.
//!
//! Assertions over what a [`LocalTransport`] captured and what a
//! [`MemoryEmailStore`] recorded. Failure messages list what was actually
//! sent or stored.
//!
//! # Example
//!
//! ```rust,ignore
//! use mailshot::prelude::*;
//! use mailshot::testing::*;
//!
//! #[tokio::test]
//! async fn test_newsletter() {
//!     let transport = LocalTransport::new();
//!     transport.fail_for("gone@example.com", "550 mailbox unavailable");
//!
//!     // ... compose and drain the queue ...
//!
//!     assert_sent_count(&transport, 9);
//!     refute_sent_to(&transport, "gone@example.com");
//!     assert_email_status(&store, email_id, EmailStatus::Partial);
//!     assert_recipient_status(&store, email_id, "gone@example.com", RecipientStatus::Failed);
//!     assert_subject_matches(&transport, r"^Newsletter #\d+$");
//! }
//! ```

use regex::Regex;
use uuid::Uuid;

use crate::model::{EmailStatus, RecipientStatus};
use crate::providers::{CapturedMessage, LocalTransport};
use crate::store::MemoryEmailStore;

// ============================================================================
// Helper Functions
// ============================================================================

fn format_sent_summary(messages: &[CapturedMessage]) -> String {
    if messages.is_empty() {
        return "  (nothing sent)".to_string();
    }

    messages
        .iter()
        .enumerate()
        .map(|(i, captured)| {
            let m = &captured.message;
            let from = m.from.as_ref().map(|a| a.email.as_str()).unwrap_or("<none>");
            format!(
                "  {}. To: {}, From: {}, Subject: \"{}\"",
                i + 1,
                m.to.email,
                from,
                m.subject
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_recipient_summary(store: &MemoryEmailStore, email_id: Uuid) -> String {
    let rows = store.recipients(email_id);
    if rows.is_empty() {
        return "  (no recipients)".to_string();
    }
    rows.iter()
        .map(|r| {
            format!(
                "  {} -> {:?}{}",
                r.address.email,
                r.status,
                r.error
                    .as_deref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Transport Assertions
// ============================================================================

/// Assert that exactly N messages were sent.
///
/// # Panics
///
/// Panics if the count doesn't match.
pub fn assert_sent_count(transport: &LocalTransport, expected: usize) {
    let actual = transport.sent_count();
    assert!(
        actual == expected,
        "Expected {} message(s) to be sent, but {} were sent.\n\nSent:\n{}",
        expected,
        actual,
        format_sent_summary(&transport.messages())
    );
}

/// Assert that a message was sent to an address.
///
/// # Panics
///
/// Panics if nothing was sent to the address.
pub fn assert_sent_to(transport: &LocalTransport, email: &str) {
    assert!(
        transport.sent_to(email),
        "Expected a message to be sent to '{}'.\n\nSent:\n{}",
        email,
        format_sent_summary(&transport.messages())
    );
}

/// Assert that nothing was sent to an address.
///
/// # Panics
///
/// Panics if a message was sent to the address.
pub fn refute_sent_to(transport: &LocalTransport, email: &str) {
    assert!(
        !transport.sent_to(email),
        "Expected no message to be sent to '{}', but {} were.",
        email,
        transport.count_to(email)
    );
}

/// Assert that every sent message's subject matches a regex.
///
/// # Panics
///
/// Panics if the pattern is invalid, nothing was sent, or a subject doesn't match.
pub fn assert_subject_matches(transport: &LocalTransport, pattern: &str) {
    let re = Regex::new(pattern).unwrap_or_else(|e| panic!("Invalid regex '{}': {}", pattern, e));
    let messages = transport.messages();
    assert!(
        !messages.is_empty(),
        "Expected subjects matching /{}/, but nothing was sent",
        pattern
    );

    if let Some(bad) = messages.iter().find(|m| !re.is_match(&m.message.subject)) {
        panic!(
            "Expected every subject to match /{}/, but \"{}\" did not.\n\nSent:\n{}",
            pattern,
            bad.message.subject,
            format_sent_summary(&messages)
        );
    }
}

// ============================================================================
// Store Assertions
// ============================================================================

/// Assert an email's status.
///
/// # Panics
///
/// Panics if the email is missing or its status differs.
pub fn assert_email_status(store: &MemoryEmailStore, email_id: Uuid, expected: EmailStatus) {
    let Some(email) = store.email(email_id) else {
        panic!("Expected email {} to exist, but it was not found", email_id);
    };
    assert!(
        email.status == expected,
        "Expected email {} to be {:?}, but it is {:?} ({} sent, {} failed).\n\nRecipients:\n{}",
        email_id,
        expected,
        email.status,
        email.successful_deliveries,
        email.failed_deliveries,
        format_recipient_summary(store, email_id)
    );
}

/// Assert the status of one recipient of an email, looked up by address.
///
/// # Panics
///
/// Panics if the address is not a recipient or its status differs.
pub fn assert_recipient_status(
    store: &MemoryEmailStore,
    email_id: Uuid,
    address: &str,
    expected: RecipientStatus,
) {
    let rows = store.recipients(email_id);
    let Some(row) = rows
        .iter()
        .find(|r| r.address.email.eq_ignore_ascii_case(address))
    else {
        panic!(
            "Expected '{}' to be a recipient of {}.\n\nRecipients:\n{}",
            address,
            email_id,
            format_recipient_summary(store, email_id)
        );
    };
    assert!(
        row.status == expected,
        "Expected recipient '{}' to be {:?}, but it is {:?}.\n\nRecipients:\n{}",
        address,
        expected,
        row.status,
        format_recipient_summary(store, email_id)
    );
}
