//! External collaborators: recipient resolution and attachment loading.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::attachment::Attachment;
use crate::error::EngineError;
use crate::model::{RecipientSelection, ResolvedRecipient};

/// Turns a recipient selection into concrete addresses.
///
/// Empty and partial results are valid; the engine rejects a compose that
/// resolves to nobody.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn resolve(
        &self,
        account_id: Uuid,
        selection: &RecipientSelection,
    ) -> Result<Vec<ResolvedRecipient>, EngineError>;
}

/// Loads the attachments to include on every send of an email.
#[async_trait]
pub trait AttachmentLoader: Send + Sync {
    async fn load(&self, email_id: Uuid) -> Result<Vec<Attachment>, EngineError>;
}

/// Resolver backed by in-memory contacts and groups.
///
/// `Addresses` selections pass straight through; `All`, `Contacts` and
/// `Groups` are looked up per account.
#[derive(Debug, Default)]
pub struct StaticResolver {
    contacts: RwLock<HashMap<Uuid, Vec<(Uuid, ResolvedRecipient)>>>,
    groups: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contact under an account. Returns the contact ID.
    pub fn add_contact(&self, account_id: Uuid, recipient: ResolvedRecipient) -> Uuid {
        let contact_id = recipient.contact_id.unwrap_or_else(Uuid::new_v4);
        let recipient = recipient.contact(contact_id);
        self.contacts
            .write()
            .entry(account_id)
            .or_default()
            .push((contact_id, recipient));
        contact_id
    }

    /// Put a contact into a group.
    pub fn add_to_group(&self, group_id: Uuid, contact_id: Uuid) {
        self.groups.write().entry(group_id).or_default().push(contact_id);
    }
}

#[async_trait]
impl RecipientResolver for StaticResolver {
    async fn resolve(
        &self,
        account_id: Uuid,
        selection: &RecipientSelection,
    ) -> Result<Vec<ResolvedRecipient>, EngineError> {
        let wanted: Option<Vec<Uuid>> = match selection {
            RecipientSelection::Addresses { addresses } => {
                return Ok(addresses
                    .iter()
                    .cloned()
                    .map(|a| ResolvedRecipient::new(a, "address"))
                    .collect());
            }
            RecipientSelection::All => None,
            RecipientSelection::Contacts { ids } => Some(ids.clone()),
            RecipientSelection::Groups { ids } => {
                let groups = self.groups.read();
                Some(
                    ids.iter()
                        .filter_map(|g| groups.get(g))
                        .flatten()
                        .copied()
                        .collect(),
                )
            }
        };

        let contacts = self.contacts.read();
        let Some(account) = contacts.get(&account_id) else {
            return Ok(Vec::new());
        };

        let resolved = match wanted {
            None => account.iter().map(|(_, r)| r.clone()).collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| account.iter().find(|(cid, _)| cid == id))
                .map(|(_, r)| r.clone())
                .collect(),
        };
        Ok(resolved)
    }
}

/// Loader for emails that never carry attachments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttachments;

#[async_trait]
impl AttachmentLoader for NoAttachments {
    async fn load(&self, _email_id: Uuid) -> Result<Vec<Attachment>, EngineError> {
        Ok(Vec::new())
    }
}

/// In-memory attachment storage keyed by email ID.
#[derive(Debug, Default)]
pub struct MemoryAttachments {
    by_email: RwLock<HashMap<Uuid, Vec<Attachment>>>,
}

impl MemoryAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an attachment for an email.
    pub fn attach(&self, email_id: Uuid, attachment: Attachment) {
        self.by_email
            .write()
            .entry(email_id)
            .or_default()
            .push(attachment);
    }
}

#[async_trait]
impl AttachmentLoader for MemoryAttachments {
    async fn load(&self, email_id: Uuid) -> Result<Vec<Attachment>, EngineError> {
        Ok(self
            .by_email
            .read()
            .get(&email_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_group_resolution() {
        let resolver = StaticResolver::new();
        let account = Uuid::new_v4();
        let team = Uuid::new_v4();

        let a = resolver.add_contact(account, ResolvedRecipient::new("a@x.org", "player"));
        let _b = resolver.add_contact(account, ResolvedRecipient::new("b@x.org", "player"));
        let c = resolver.add_contact(account, ResolvedRecipient::new("c@x.org", "guardian"));
        resolver.add_to_group(team, a);
        resolver.add_to_group(team, c);

        let resolved = resolver
            .resolve(account, &RecipientSelection::Groups { ids: vec![team] })
            .await
            .unwrap();
        let emails: Vec<&str> = resolved.iter().map(|r| r.address.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.org", "c@x.org"]);
        assert_eq!(resolved[1].contact_id, Some(c));
    }

    #[tokio::test]
    async fn test_all_and_unknown_account() {
        let resolver = StaticResolver::new();
        let account = Uuid::new_v4();
        resolver.add_contact(account, ResolvedRecipient::new("a@x.org", "player"));

        let all = resolver.resolve(account, &RecipientSelection::All).await.unwrap();
        assert_eq!(all.len(), 1);

        let none = resolver
            .resolve(Uuid::new_v4(), &RecipientSelection::All)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_addresses_pass_through() {
        let resolver = StaticResolver::new();
        let selection = RecipientSelection::Addresses {
            addresses: vec!["x@y.org".into()],
        };
        let resolved = resolver.resolve(Uuid::new_v4(), &selection).await.unwrap();
        assert_eq!(resolved[0].recipient_type, "address");
    }

    #[tokio::test]
    async fn test_memory_attachments() {
        let loader = MemoryAttachments::new();
        let id = Uuid::new_v4();
        loader.attach(id, Attachment::from_bytes("a.pdf", vec![1]));

        assert_eq!(loader.load(id).await.unwrap().len(), 1);
        assert!(loader.load(Uuid::new_v4()).await.unwrap().is_empty());
        assert!(NoAttachments.load(id).await.unwrap().is_empty());
    }
}
