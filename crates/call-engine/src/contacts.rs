//! Contact directory boundary
//!
//! The CRM owns contacts; the engine touches them in exactly one place:
//! a successful transfer advances the contact behind the call's
//! destination number to "contacted". Nothing else in the event stream
//! moves a contact, not even an answer. That restriction is
//! product policy, not an oversight.

use async_trait::async_trait;

use crate::error::Result;

/// Lifecycle status of a contact as the CRM models it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactStatus {
    New,
    Queued,
    Contacted,
    Sold,
    DoNotCall,
    Other(String),
}

impl ContactStatus {
    /// Statuses a transfer must never downgrade.
    pub fn is_settled(&self) -> bool {
        matches!(self, ContactStatus::Contacted | ContactStatus::Sold)
    }
}

/// A contact as the engine sees it.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: String,
    pub tenant_id: String,
    pub number: String,
    pub status: ContactStatus,
}

/// The CRM collaborator's surface.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Contact owning this number within the tenant, if any.
    async fn find_by_number(&self, number: &str, tenant_id: &str) -> Result<Option<Contact>>;

    /// Advance the contact to "contacted".
    async fn mark_contacted(&self, contact_id: &str) -> Result<()>;
}

/// No-op directory for deployments without a CRM attached.
#[derive(Default)]
pub struct NullContactDirectory;

#[async_trait]
impl ContactDirectory for NullContactDirectory {
    async fn find_by_number(&self, _number: &str, _tenant_id: &str) -> Result<Option<Contact>> {
        Ok(None)
    }

    async fn mark_contacted(&self, _contact_id: &str) -> Result<()> {
        Ok(())
    }
}
