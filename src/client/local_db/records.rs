//! # Offline Records
//!
//! Entity snapshots cached locally when a remote write could not be
//! applied. Keyed by `(collection, entity_id)`; `put` is an idempotent
//! upsert where the last write wins.

use crate::client::local_db::LocalDatabase;
use crate::shared::entity::Document;
use crate::shared::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// Which speculative write produced an offline record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OfflineOperation {
    Create,
    Update,
}

impl OfflineOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineOperation::Create => "create",
            OfflineOperation::Update => "update",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(OfflineOperation::Create),
            "update" => Some(OfflineOperation::Update),
            _ => None,
        }
    }
}

/// Locally cached entity snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineRecord {
    pub collection: String,
    pub entity_id: String,
    pub payload: Document,
    /// Snapshot originated on this device while the remote was unreachable
    pub offline: bool,
    /// A pending operation still has to deliver this snapshot
    pub pending_sync: bool,
    pub offline_operation: OfflineOperation,
    pub stored_at: DateTime<Utc>,
}

impl OfflineRecord {
    /// Snapshot awaiting delivery by the sync engine
    pub fn pending(
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Document,
        offline_operation: OfflineOperation,
    ) -> Self {
        Self {
            collection: collection.into(),
            entity_id: entity_id.into(),
            payload,
            offline: true,
            pending_sync: true,
            offline_operation,
            stored_at: Utc::now(),
        }
    }

    /// Snapshot restored by a rollback; nothing is left to deliver
    pub fn restored(
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Document,
        offline_operation: OfflineOperation,
    ) -> Self {
        Self {
            pending_sync: false,
            ..Self::pending(collection, entity_id, payload, offline_operation)
        }
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let payload: String = row.try_get("payload")?;
        let operation: String = row.try_get("offline_operation")?;
        let offline_operation = OfflineOperation::parse(&operation).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown offline operation '{operation}'").into())
        })?;

        Ok(Self {
            collection: row.try_get("collection")?,
            entity_id: row.try_get("entity_id")?,
            payload: serde_json::from_str(&payload)?,
            offline: row.try_get("offline")?,
            pending_sync: row.try_get("pending_sync")?,
            offline_operation,
            stored_at: row.try_get("stored_at")?,
        })
    }
}

/// Upsert a record through any executor, so callers can join a transaction
pub(crate) async fn upsert_record<'e, E>(executor: E, record: &OfflineRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO offline_records
            (collection, entity_id, payload, offline, pending_sync, offline_operation, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (collection, entity_id) DO UPDATE SET
            payload = excluded.payload,
            offline = excluded.offline,
            pending_sync = excluded.pending_sync,
            offline_operation = excluded.offline_operation,
            stored_at = excluded.stored_at",
    )
    .bind(&record.collection)
    .bind(&record.entity_id)
    .bind(serde_json::to_string(&record.payload)?)
    .bind(record.offline)
    .bind(record.pending_sync)
    .bind(record.offline_operation.as_str())
    .bind(record.stored_at)
    .execute(executor)
    .await?;
    Ok(())
}

impl LocalDatabase {
    /// Store a snapshot, replacing any previous one for the same key
    pub async fn put_record(&self, record: &OfflineRecord) -> Result<()> {
        upsert_record(self.pool(), record).await
    }

    /// Fetch one snapshot
    pub async fn get_record(&self, collection: &str, entity_id: &str) -> Result<Option<OfflineRecord>> {
        let row = sqlx::query(
            "SELECT collection, entity_id, payload, offline, pending_sync, offline_operation, stored_at
             FROM offline_records
             WHERE collection = ? AND entity_id = ?",
        )
        .bind(collection)
        .bind(entity_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(OfflineRecord::from_row).transpose()
    }

    /// All snapshots of a collection, in no particular order
    pub async fn get_all_records(&self, collection: &str) -> Result<Vec<OfflineRecord>> {
        let rows = sqlx::query(
            "SELECT collection, entity_id, payload, offline, pending_sync, offline_operation, stored_at
             FROM offline_records
             WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(OfflineRecord::from_row).collect()
    }

    /// Delete a snapshot; returns whether one existed
    pub async fn remove_record(&self, collection: &str, entity_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM offline_records WHERE collection = ? AND entity_id = ?")
            .bind(collection)
            .bind(entity_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
