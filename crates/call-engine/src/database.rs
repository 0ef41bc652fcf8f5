//! # Async Call-Record Store (sqlx + SQLite)
//!
//! Production implementation of [`CallRecordStore`] on sqlx with SQLite.
//! Fully async and Send-safe (handles can be cloned into `tokio::spawn`
//! without trait-object friction) with WAL journaling for concurrent
//! reader/writer behavior.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ringline_call_engine::database::SqliteCallStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = SqliteCallStore::new("sqlite:ringline.db").await?;
//! // or, for tests:
//! let store = SqliteCallStore::new_in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{CallEngineError, Result};
use crate::store::{
    AuditEntry, CallRecord, CallRecordStore, CallRecordUpdate, CallStatus, Disposition,
};

/// sqlx-backed durable store
#[derive(Clone)]
pub struct SqliteCallStore {
    pool: SqlitePool,
}

impl SqliteCallStore {
    /// Connect and bootstrap the schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("🗄️ Initializing call-record store: {}", database_url);

        let options = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CallEngineError::store(format!("invalid database url: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| CallEngineError::store(format!("failed to connect: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS call_records (
                id               TEXT PRIMARY KEY,
                tenant_id        TEXT NOT NULL,
                status           TEXT NOT NULL,
                disposition      TEXT,
                pbx_call_id      TEXT,
                from_number      TEXT NOT NULL,
                to_number        TEXT NOT NULL,
                transfer_number  TEXT,
                duration_seconds INTEGER,
                audit_log        TEXT NOT NULL DEFAULT '[]',
                metadata         TEXT NOT NULL DEFAULT '{}',
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| CallEngineError::store(format!("schema bootstrap failed: {}", e)))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_call_records_pbx_call_id ON call_records (pbx_call_id);",
            "CREATE INDEX IF NOT EXISTS idx_call_records_to_number ON call_records (to_number, created_at);",
            "CREATE INDEX IF NOT EXISTS idx_call_records_from_number ON call_records (from_number, created_at);",
            "CREATE INDEX IF NOT EXISTS idx_call_records_status ON call_records (status, updated_at);",
        ] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| CallEngineError::store(format!("index bootstrap failed: {}", e)))?;
        }

        info!("✅ Call-record store initialized (WAL mode enabled)");
        Ok(Self { pool })
    }

    /// In-memory database for testing.
    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Access the underlying pool for reporting queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CallRecord> {
        let status_raw: String = row
            .try_get("status")
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let status = CallStatus::parse(&status_raw)
            .ok_or_else(|| CallEngineError::store(format!("unknown status '{}'", status_raw)))?;

        let disposition: Option<String> = row
            .try_get("disposition")
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let disposition = disposition.as_deref().and_then(Disposition::parse);

        let audit_raw: String = row
            .try_get("audit_log")
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let audit_log: Vec<AuditEntry> = serde_json::from_str(&audit_raw)
            .map_err(|e| CallEngineError::store(format!("bad audit log json: {}", e)))?;

        let metadata_raw: String = row
            .try_get("metadata")
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let metadata = serde_json::from_str(&metadata_raw)
            .map_err(|e| CallEngineError::store(format!("bad metadata json: {}", e)))?;

        let get = |field: &str| -> Result<String> {
            row.try_get::<String, _>(field)
                .map_err(|e| CallEngineError::store(e.to_string()))
        };

        Ok(CallRecord {
            id: get("id")?,
            tenant_id: get("tenant_id")?,
            status,
            disposition,
            pbx_call_id: row
                .try_get("pbx_call_id")
                .map_err(|e| CallEngineError::store(e.to_string()))?,
            from_number: get("from_number")?,
            to_number: get("to_number")?,
            transfer_number: row
                .try_get("transfer_number")
                .map_err(|e| CallEngineError::store(e.to_string()))?,
            duration_seconds: row
                .try_get("duration_seconds")
                .map_err(|e| CallEngineError::store(e.to_string()))?,
            audit_log,
            metadata,
            created_at: row
                .try_get("created_at")
                .map_err(|e| CallEngineError::store(e.to_string()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| CallEngineError::store(e.to_string()))?,
        })
    }

    async fn fetch_optional<'q>(
        &self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> Result<Option<CallRecord>> {
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        row.as_ref().map(Self::from_row).transpose()
    }
}

#[async_trait]
impl CallRecordStore for SqliteCallStore {
    async fn insert(&self, record: CallRecord) -> Result<()> {
        let audit_json = serde_json::to_string(&record.audit_log)
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| CallEngineError::store(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO call_records
                (id, tenant_id, status, disposition, pbx_call_id, from_number, to_number,
                 transfer_number, duration_seconds, audit_log, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(record.status.as_str())
        .bind(record.disposition.map(|d| d.as_str()))
        .bind(&record.pbx_call_id)
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(&record.transfer_number)
        .bind(record.duration_seconds)
        .bind(audit_json)
        .bind(metadata_json)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CallEngineError::store(e.to_string()))?;

        debug!("Inserted call record {}", record.id);
        Ok(())
    }

    async fn find_by_call_id(&self, pbx_call_id: &str) -> Result<Option<CallRecord>> {
        self.fetch_optional(
            sqlx::query("SELECT * FROM call_records WHERE pbx_call_id = ? LIMIT 1")
                .bind(pbx_call_id),
        )
        .await
    }

    async fn find_by_destination_within(
        &self,
        to_number: &str,
        window: Duration,
    ) -> Result<Option<CallRecord>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        self.fetch_optional(
            sqlx::query(
                "SELECT * FROM call_records WHERE to_number = ? AND created_at >= ? \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(to_number)
            .bind(cutoff),
        )
        .await
    }

    async fn find_by_caller_within(
        &self,
        from_number: &str,
        window: Duration,
    ) -> Result<Option<CallRecord>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        self.fetch_optional(
            sqlx::query(
                "SELECT * FROM call_records WHERE from_number = ? AND created_at >= ? \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(from_number)
            .bind(cutoff),
        )
        .await
    }

    async fn find_stuck(
        &self,
        status: CallStatus,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<CallRecord>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let rows = sqlx::query(
            "SELECT * FROM call_records WHERE status = ? AND updated_at < ? \
             ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CallEngineError::store(e.to_string()))?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn update(&self, record_id: &str, update: CallRecordUpdate) -> Result<()> {
        // Read-modify-write inside a transaction: the audit cap and the
        // metadata merge both need the current value.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CallEngineError::store(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM call_records WHERE id = ? LIMIT 1")
            .bind(record_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let Some(row) = row else {
            return Err(CallEngineError::not_found(format!("call record {}", record_id)));
        };
        let mut record = Self::from_row(&row)?;
        update.apply(&mut record);

        let audit_json = serde_json::to_string(&record.audit_log)
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| CallEngineError::store(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE call_records SET
                status = ?, disposition = ?, pbx_call_id = ?, duration_seconds = ?,
                audit_log = ?, metadata = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.disposition.map(|d| d.as_str()))
        .bind(&record.pbx_call_id)
        .bind(record.duration_seconds)
        .bind(audit_json)
        .bind(metadata_json)
        .bind(record.updated_at)
        .bind(record_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CallEngineError::store(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CallEngineError::store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteCallStore {
        SqliteCallStore::new_in_memory().await.expect("in-memory store")
    }

    #[tokio::test]
    async fn insert_and_find_by_call_id() {
        let store = store().await;
        let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
        record.pbx_call_id = Some("1722890000.101".to_string());
        let id = record.id.clone();
        store.insert(record).await.unwrap();

        let found = store
            .find_by_call_id("1722890000.101")
            .await
            .unwrap()
            .expect("record by call id");
        assert_eq!(found.id, id);
        assert_eq!(found.status, CallStatus::Initiated);
    }

    #[tokio::test]
    async fn update_appends_audit_and_merges_metadata() {
        let store = store().await;
        let record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
        let id = record.id.clone();
        store.insert(record).await.unwrap();

        store
            .update(
                &id,
                CallRecordUpdate::new()
                    .status(CallStatus::Connected)
                    .audit("CallStatus", json!({ "status": "connected" }))
                    .merge_metadata(json!({ "campaign": "spring" })),
            )
            .await
            .unwrap();
        store
            .update(
                &id,
                CallRecordUpdate::new()
                    .audit("Newstate", json!({ "channelState": 6 }))
                    .merge_metadata(json!({ "attempt": 2 })),
            )
            .await
            .unwrap();

        let record = store
            .find_by_destination_within("+14045551234", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("record by destination");
        assert_eq!(record.id, id);
        assert_eq!(record.status, CallStatus::Connected);
        assert_eq!(record.audit_log.len(), 2);
        assert_eq!(record.metadata["campaign"], "spring");
        assert_eq!(record.metadata["attempt"], 2);
    }

    #[tokio::test]
    async fn stuck_scan_matches_only_old_records_in_status() {
        let store = store().await;

        let mut stuck = CallRecord::new("tenant-1", "+14045550000", "+14045551111");
        stuck.status = CallStatus::Connected;
        stuck.created_at = Utc::now() - chrono::Duration::minutes(12);
        stuck.updated_at = stuck.created_at;
        let stuck_id = stuck.id.clone();
        store.insert(stuck).await.unwrap();

        let mut fresh = CallRecord::new("tenant-1", "+14045550000", "+14045552222");
        fresh.status = CallStatus::Connected;
        store.insert(fresh).await.unwrap();

        let mut terminal = CallRecord::new("tenant-1", "+14045550000", "+14045553333");
        terminal.status = CallStatus::Completed;
        terminal.created_at = Utc::now() - chrono::Duration::minutes(12);
        terminal.updated_at = terminal.created_at;
        store.insert(terminal).await.unwrap();

        let found = store
            .find_stuck(CallStatus::Connected, Duration::from_secs(600), 100)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stuck_id);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = store().await;
        let err = store
            .update("no-such-id", CallRecordUpdate::new().status(CallStatus::Failed))
            .await
            .expect_err("missing record");
        assert!(matches!(err, CallEngineError::NotFound(_)));
    }
}
