//! Durable call-record store boundary
//!
//! The durable record is owned by the persistence collaborator: creation
//! happens upstream when a call request is accepted, and this engine only
//! reads and updates it. [`CallRecordStore`] is the exact surface the
//! engine needs: the three lookup strategies the hangup fallback chain
//! walks, the paged stuck-record scan the reaper runs, and a field-set
//! update with append-to-capped-audit-log and merge-into-metadata
//! semantics.
//!
//! [`MemoryCallStore`] backs tests with an isolated instance per case;
//! the production implementation is [`crate::database::SqliteCallStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallEngineError, Result};

/// Maximum audit entries a record retains; appends beyond this evict the
/// oldest entry.
pub const AUDIT_LOG_CAP: usize = 100;

/// Lifecycle status of a durable call record.
///
/// Status only ever advances toward a terminal state; the stale-state
/// reaper guarantees no record stays non-terminal forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Initiated,
    Connected,
    Answered,
    Completed,
    Failed,
    NoAnswer,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "INITIATED",
            CallStatus::Connected => "CONNECTED",
            CallStatus::Answered => "ANSWERED",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Failed => "FAILED",
            CallStatus::NoAnswer => "NO_ANSWER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(CallStatus::Initiated),
            "CONNECTED" => Some(CallStatus::Connected),
            "ANSWERED" => Some(CallStatus::Answered),
            "COMPLETED" => Some(CallStatus::Completed),
            "FAILED" => Some(CallStatus::Failed),
            "NO_ANSWER" => Some(CallStatus::NoAnswer),
            _ => None,
        }
    }

    /// COMPLETED, FAILED, and NO_ANSWER are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::NoAnswer
        )
    }
}

/// Outcome classification of a call, distinct from its lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Answered,
    NoAnswer,
    Busy,
    Cancelled,
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Answered => "ANSWERED",
            Disposition::NoAnswer => "NO_ANSWER",
            Disposition::Busy => "BUSY",
            Disposition::Cancelled => "CANCELLED",
            Disposition::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ANSWERED" => Some(Disposition::Answered),
            "NO_ANSWER" => Some(Disposition::NoAnswer),
            "BUSY" => Some(Disposition::Busy),
            "CANCELLED" => Some(Disposition::Cancelled),
            "FAILED" => Some(Disposition::Failed),
            _ => None,
        }
    }
}

/// One entry in a record's capped event-audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Event type name ("Hangup", "DialEnd", "ForcedCleanup", ...)
    pub event: String,
    pub timestamp: DateTime<Utc>,
    /// Raw event payload
    pub data: Value,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// The durable representation of one call.
///
/// Numbers are stored in leading-plus international form so the engine's
/// number-based lookups compare like with like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub tenant_id: String,
    pub status: CallStatus,
    pub disposition: Option<Disposition>,
    /// The PBX's own call identifier; unknown until the channel exists.
    pub pbx_call_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub transfer_number: Option<String>,
    pub duration_seconds: Option<i64>,
    /// Append-only, capped at [`AUDIT_LOG_CAP`] entries.
    pub audit_log: Vec<AuditEntry>,
    /// Free-form metadata; updates merge rather than replace.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// A fresh INITIATED record, as the upstream request layer creates it.
    pub fn new(
        tenant_id: impl Into<String>,
        from_number: impl Into<String>,
        to_number: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            status: CallStatus::Initiated,
            disposition: None,
            pbx_call_id: None,
            from_number: from_number.into(),
            to_number: to_number.into(),
            transfer_number: None,
            duration_seconds: None,
            audit_log: Vec::new(),
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an audit entry, evicting the oldest once at capacity.
    pub fn append_audit(&mut self, entry: AuditEntry) {
        if self.audit_log.len() >= AUDIT_LOG_CAP {
            self.audit_log.remove(0);
        }
        self.audit_log.push(entry);
    }

    /// Merge a JSON object into the record's metadata, key by key.
    pub fn merge_metadata(&mut self, patch: &Value) {
        if let (Value::Object(base), Value::Object(patch)) = (&mut self.metadata, patch) {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Field-set update for a durable record.
///
/// Unset fields are left alone; `append_audit` and `merge_metadata` carry
/// the two non-overwrite semantics the engine relies on.
#[derive(Debug, Clone, Default)]
pub struct CallRecordUpdate {
    pub status: Option<CallStatus>,
    pub disposition: Option<Disposition>,
    pub pbx_call_id: Option<String>,
    pub duration_seconds: Option<i64>,
    pub append_audit: Option<AuditEntry>,
    pub merge_metadata: Option<Value>,
}

impl CallRecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = Some(disposition);
        self
    }

    pub fn pbx_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.pbx_call_id = Some(call_id.into());
        self
    }

    pub fn duration_seconds(mut self, seconds: i64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn audit(mut self, event: impl Into<String>, data: Value) -> Self {
        self.append_audit = Some(AuditEntry::new(event, data));
        self
    }

    pub fn merge_metadata(mut self, patch: Value) -> Self {
        self.merge_metadata = Some(patch);
        self
    }

    /// Apply to a record in place, stamping `updated_at`.
    pub fn apply(self, record: &mut CallRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(disposition) = self.disposition {
            record.disposition = Some(disposition);
        }
        if let Some(call_id) = self.pbx_call_id {
            record.pbx_call_id = Some(call_id);
        }
        if let Some(seconds) = self.duration_seconds {
            record.duration_seconds = Some(seconds);
        }
        if let Some(entry) = self.append_audit {
            record.append_audit(entry);
        }
        if let Some(patch) = self.merge_metadata {
            record.merge_metadata(&patch);
        }
        record.updated_at = Utc::now();
    }
}

/// The persistence collaborator's surface, as the engine needs it.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Insert a new record. Called by the upstream request layer and by
    /// tests; the engine itself never creates records.
    async fn insert(&self, record: CallRecord) -> Result<()>;

    /// Record carrying this PBX call id, if any.
    async fn find_by_call_id(&self, pbx_call_id: &str) -> Result<Option<CallRecord>>;

    /// Most recent record to this destination number created within the
    /// window.
    async fn find_by_destination_within(
        &self,
        to_number: &str,
        window: Duration,
    ) -> Result<Option<CallRecord>>;

    /// Most recent record from this caller number created within the
    /// window.
    async fn find_by_caller_within(
        &self,
        from_number: &str,
        window: Duration,
    ) -> Result<Option<CallRecord>>;

    /// Records sitting in `status` whose last update is older than
    /// `older_than`, at most `limit` of them.
    async fn find_stuck(
        &self,
        status: CallStatus,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<CallRecord>>;

    /// Apply a field-set update to one record.
    async fn update(&self, record_id: &str, update: CallRecordUpdate) -> Result<()>;
}

/// In-memory store for tests: one isolated instance per test case.
#[derive(Default)]
pub struct MemoryCallStore {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one record, for assertions.
    pub fn get(&self, record_id: &str) -> Option<CallRecord> {
        self.records.lock().iter().find(|r| r.id == record_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl CallRecordStore for MemoryCallStore {
    async fn insert(&self, record: CallRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn find_by_call_id(&self, pbx_call_id: &str) -> Result<Option<CallRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| r.pbx_call_id.as_deref() == Some(pbx_call_id))
            .cloned())
    }

    async fn find_by_destination_within(
        &self,
        to_number: &str,
        window: Duration,
    ) -> Result<Option<CallRecord>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.to_number == to_number && r.created_at >= cutoff)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_by_caller_within(
        &self,
        from_number: &str,
        window: Duration,
    ) -> Result<Option<CallRecord>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.from_number == from_number && r.created_at >= cutoff)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_stuck(
        &self,
        status: CallStatus,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<CallRecord>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.status == status && r.updated_at < cutoff)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, record_id: &str, update: CallRecordUpdate) -> Result<()> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| CallEngineError::not_found(format!("call record {}", record_id)))?;
        update.apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn audit_log_caps_at_one_hundred() {
        let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
        for i in 0..150 {
            record.append_audit(AuditEntry::new("Newstate", json!({ "seq": i })));
        }
        assert_eq!(record.audit_log.len(), AUDIT_LOG_CAP);
        // Oldest fifty were evicted.
        assert_eq!(record.audit_log[0].data["seq"], 50);
        assert_eq!(record.audit_log[99].data["seq"], 149);
    }

    #[test]
    fn metadata_merges_key_by_key() {
        let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
        record.merge_metadata(&json!({ "campaign": "spring", "attempt": 1 }));
        record.merge_metadata(&json!({ "attempt": 2 }));
        assert_eq!(record.metadata["campaign"], "spring");
        assert_eq!(record.metadata["attempt"], 2);
    }

    #[test]
    fn terminal_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(CallStatus::NoAnswer.is_terminal());
        assert!(!CallStatus::Initiated.is_terminal());
        assert!(!CallStatus::Connected.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
    }

    #[test]
    fn status_round_trips_through_wire_names() {
        for status in [
            CallStatus::Initiated,
            CallStatus::Connected,
            CallStatus::Answered,
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::NoAnswer,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
    }

    #[tokio::test]
    async fn destination_lookup_honors_window() {
        let store = MemoryCallStore::new();
        let mut old = CallRecord::new("t", "+15550001111", "+14045551234");
        old.created_at = Utc::now() - chrono::Duration::minutes(30);
        store.insert(old).await.unwrap();

        let fresh = CallRecord::new("t", "+15550001111", "+14045551234");
        let fresh_id = fresh.id.clone();
        store.insert(fresh).await.unwrap();

        let found = store
            .find_by_destination_within("+14045551234", Duration::from_secs(600))
            .await
            .unwrap()
            .expect("fresh record inside the window");
        assert_eq!(found.id, fresh_id);

        let none = store
            .find_by_destination_within("+14045551234", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(none.is_none() || none.unwrap().id == fresh_id);
    }

    #[tokio::test]
    async fn update_applies_field_sets() {
        let store = MemoryCallStore::new();
        let record = CallRecord::new("t", "+15550001111", "+14045551234");
        let id = record.id.clone();
        store.insert(record).await.unwrap();

        store
            .update(
                &id,
                CallRecordUpdate::new()
                    .status(CallStatus::Connected)
                    .pbx_call_id("171.22")
                    .audit("CallStatus", json!({ "status": "connected" })),
            )
            .await
            .unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, CallStatus::Connected);
        assert_eq!(record.pbx_call_id.as_deref(), Some("171.22"));
        assert_eq!(record.audit_log.len(), 1);
    }
}
