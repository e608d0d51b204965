//! Persisted records: bulk emails and their recipients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;

/// Lifecycle of a bulk email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
    Partial,
}

impl EmailStatus {
    /// `sent`, `failed` and `partial` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Partial)
    }

    /// Terminal status implied by delivery counts.
    ///
    /// `sent` iff nothing failed and something succeeded, `failed` iff nothing
    /// succeeded, `partial` otherwise.
    pub fn from_counts(successful: u32, failed: u32) -> Self {
        match (successful, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Sent,
            _ => Self::Partial,
        }
    }
}

/// Per-recipient delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

/// A bulk email owned by an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    pub account_id: Uuid,
    pub created_by: Uuid,
    pub subject: String,
    /// Rich (HTML) body as composed.
    pub html_body: String,
    /// Plain-text body, derived from the HTML unless supplied.
    pub text_body: String,
    pub reply_to: Option<Address>,
    pub status: EmailStatus,
    pub scheduled_send_at: Option<DateTime<Utc>>,
    pub total_recipients: u32,
    pub successful_deliveries: u32,
    pub failed_deliveries: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One resolved recipient row of an [`Email`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub email_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub address: Address,
    /// Free-form tag from the resolver (e.g. "player", "guardian", "staff").
    pub recipient_type: String,
    pub status: RecipientStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Recipient {
    /// New pending row for a resolved recipient.
    pub fn pending(email_id: Uuid, resolved: ResolvedRecipient) -> Self {
        Self {
            id: Uuid::new_v4(),
            email_id,
            contact_id: resolved.contact_id,
            address: resolved.address,
            recipient_type: resolved.recipient_type,
            status: RecipientStatus::Pending,
            error: None,
            sent_at: None,
        }
    }
}

/// Output of a [`RecipientResolver`](crate::RecipientResolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecipient {
    pub contact_id: Option<Uuid>,
    /// Address with display name.
    pub address: Address,
    pub recipient_type: String,
}

impl ResolvedRecipient {
    /// Build a resolved recipient without a backing contact.
    pub fn new(address: impl Into<Address>, recipient_type: impl Into<String>) -> Self {
        Self {
            contact_id: None,
            address: address.into(),
            recipient_type: recipient_type.into(),
        }
    }

    /// Attach the contact this address was resolved from.
    pub fn contact(mut self, contact_id: Uuid) -> Self {
        self.contact_id = Some(contact_id);
        self
    }
}

/// Who a bulk email should go to. Interpreted by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientSelection {
    /// Every contact of the account.
    All,
    /// Specific contacts.
    Contacts { ids: Vec<Uuid> },
    /// Members of distribution groups (teams, rosters, leagues...).
    Groups { ids: Vec<Uuid> },
    /// Literal addresses, no resolution needed.
    Addresses { addresses: Vec<Address> },
}

/// Input to [`BulkMailer::compose_and_send`](crate::BulkMailer::compose_and_send).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub subject: String,
    pub html_body: String,
    /// Plain-text body; derived from `html_body` when absent.
    #[serde(default)]
    pub text_body: Option<String>,
    pub recipients: RecipientSelection,
    #[serde(default)]
    pub reply_to: Option<Address>,
    /// Deliver at this time instead of immediately, when in the future.
    #[serde(default)]
    pub scheduled_send_at: Option<DateTime<Utc>>,
}

impl ComposeRequest {
    /// Request with an HTML body addressed to a selection.
    pub fn new(
        subject: impl Into<String>,
        html_body: impl Into<String>,
        recipients: RecipientSelection,
    ) -> Self {
        Self {
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: None,
            recipients,
            reply_to: None,
            scheduled_send_at: None,
        }
    }

    /// Provide an explicit plain-text body.
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    /// Set the reply-to address.
    pub fn reply_to(mut self, addr: impl Into<Address>) -> Self {
        self.reply_to = Some(addr.into());
        self
    }

    /// Schedule delivery.
    pub fn schedule_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_send_at = Some(at);
        self
    }
}

/// Recipient rows of one email grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u32,
    pub sent: u32,
    pub failed: u32,
}

impl StatusCounts {
    /// Tally a set of recipient rows.
    pub fn tally<'a>(recipients: impl IntoIterator<Item = &'a Recipient>) -> Self {
        recipients
            .into_iter()
            .fold(Self::default(), |mut acc, r| {
                match r.status {
                    RecipientStatus::Pending => acc.pending += 1,
                    RecipientStatus::Sent => acc.sent += 1,
                    RecipientStatus::Failed => acc.failed += 1,
                }
                acc
            })
    }

    pub fn total(&self) -> u32 {
        self.pending + self.sent + self.failed
    }
}
