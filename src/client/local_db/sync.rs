//! # Sync Metadata Operations
//!
//! Persistence for the pending operation queue and small sync facts.
//!
//! ## Features
//!
//! - **Offline Queue**: Operations stored in enqueue order (`seq`)
//! - **Paired Writes**: Snapshot + operation inserted in one transaction ("stash")
//!   and removed in one transaction ("settle"). A later offline write to the
//!   same entity is folded into its queued operation, so a pending snapshot
//!   always has exactly one operation behind it
//! - **Reconciliation**: Find pending-sync snapshots whose operation went missing
//! - **Sync Metadata**: Key/value facts such as the last successful sync time

use crate::client::local_db::records::{upsert_record, OfflineOperation, OfflineRecord};
use crate::client::local_db::LocalDatabase;
use crate::client::offline::queue::{OperationType, PendingOperation};
use crate::shared::error::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

const SELECT_OPERATION: &str = "SELECT id, op_type, collection, entity_id, payload, pre_image,
        enqueued_at, retry_count, max_retries, last_error
     FROM pending_operations";

fn operation_from_row(row: &SqliteRow) -> Result<PendingOperation> {
    let op_type: String = row.try_get("op_type")?;
    let op_type = OperationType::parse(&op_type)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown operation type '{op_type}'").into()))?;
    let payload: String = row.try_get("payload")?;
    let pre_image: Option<String> = row.try_get("pre_image")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;

    Ok(PendingOperation {
        id: row.try_get("id")?,
        op_type,
        collection: row.try_get("collection")?,
        entity_id: row.try_get("entity_id")?,
        payload: serde_json::from_str(&payload)?,
        pre_image: pre_image.map(|p| serde_json::from_str(&p)).transpose()?,
        enqueued_at: row.try_get("enqueued_at")?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        last_error: row.try_get("last_error")?,
    })
}

async fn insert_operation_with<'e, E>(executor: E, operation: &PendingOperation) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let pre_image = operation
        .pre_image
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO pending_operations
            (id, op_type, collection, entity_id, payload, pre_image, enqueued_at, retry_count, max_retries)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&operation.id)
    .bind(operation.op_type.as_str())
    .bind(&operation.collection)
    .bind(&operation.entity_id)
    .bind(serde_json::to_string(&operation.payload)?)
    .bind(pre_image)
    .bind(operation.enqueued_at)
    .bind(operation.retry_count as i64)
    .bind(operation.max_retries as i64)
    .execute(executor)
    .await?;
    Ok(())
}

async fn rewrite_operation_with<'e, E>(executor: E, operation: &PendingOperation) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let pre_image = operation
        .pre_image
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query("UPDATE pending_operations SET op_type = ?, payload = ?, pre_image = ? WHERE id = ?")
        .bind(operation.op_type.as_str())
        .bind(serde_json::to_string(&operation.payload)?)
        .bind(pre_image)
        .bind(&operation.id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Operation now carrying an offline write
#[derive(Debug, Clone, PartialEq)]
pub struct StashedWrite {
    pub operation: PendingOperation,
    /// Folded into an operation that was already queued for the entity
    pub merged: bool,
}

impl LocalDatabase {
    /// Append an operation to the queue
    pub async fn insert_operation(&self, operation: &PendingOperation) -> Result<()> {
        insert_operation_with(self.pool(), operation).await
    }

    /// Store a snapshot and its operation atomically. When the entity
    /// already has queued work, the write is folded into the newest queued
    /// operation instead of adding a second one.
    pub async fn stash_offline_write(&self, record: &OfflineRecord, operation: &PendingOperation) -> Result<StashedWrite> {
        let mut tx = self.pool().begin().await?;

        let latest = sqlx::query(&format!(
            "{SELECT_OPERATION} WHERE collection = ? AND entity_id = ? ORDER BY seq DESC LIMIT 1"
        ))
        .bind(&operation.collection)
        .bind(&operation.entity_id)
        .fetch_optional(&mut *tx)
        .await?;

        let stashed = match latest.as_ref().map(operation_from_row).transpose()? {
            Some(queued) => {
                let folded = queued.absorb(operation);
                rewrite_operation_with(&mut *tx, &folded).await?;
                StashedWrite {
                    operation: folded,
                    merged: true,
                }
            }
            None => {
                insert_operation_with(&mut *tx, operation).await?;
                StashedWrite {
                    operation: operation.clone(),
                    merged: false,
                }
            }
        };

        let mut record = record.clone();
        record.offline_operation = match stashed.operation.op_type {
            OperationType::Create => OfflineOperation::Create,
            _ => OfflineOperation::Update,
        };
        upsert_record(&mut *tx, &record).await?;

        tx.commit().await?;
        Ok(stashed)
    }

    /// Whether any operation for the entity is still queued
    pub async fn has_pending_for(&self, collection: &str, entity_id: &str) -> Result<bool> {
        let found: (i64,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM pending_operations WHERE collection = ? AND entity_id = ?)",
        )
        .bind(collection)
        .bind(entity_id)
        .fetch_one(self.pool())
        .await?;
        Ok(found.0 != 0)
    }

    /// All queued operations, oldest first
    pub async fn list_operations(&self) -> Result<Vec<PendingOperation>> {
        let rows = sqlx::query(&format!("{SELECT_OPERATION} ORDER BY seq ASC"))
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(operation_from_row).collect()
    }

    pub async fn get_operation(&self, operation_id: &str) -> Result<Option<PendingOperation>> {
        let row = sqlx::query(&format!("{SELECT_OPERATION} WHERE id = ?"))
            .bind(operation_id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(operation_from_row).transpose()
    }

    /// Remove a delivered operation and, once no other operation refers to
    /// the same entity, its offline snapshot. Returns whether the operation
    /// was still queued.
    pub async fn settle_operation(&self, operation: &PendingOperation) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let removed = sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(&operation.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "DELETE FROM offline_records
             WHERE collection = ? AND entity_id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM pending_operations
                   WHERE collection = ? AND entity_id = ?
               )",
        )
        .bind(&operation.collection)
        .bind(&operation.entity_id)
        .bind(&operation.collection)
        .bind(&operation.entity_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Persist a failed attempt
    pub async fn update_operation_retry(&self, operation_id: &str, retry_count: u32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE pending_operations SET
                retry_count = ?,
                last_attempt = ?,
                last_error = ?
             WHERE id = ?",
        )
        .bind(retry_count as i64)
        .bind(Utc::now())
        .bind(error)
        .bind(operation_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Drop an operation that will not be delivered. Its snapshot stays
    /// readable but is no longer marked pending once the entity has no
    /// other queued work. Returns whether the operation was still queued.
    pub async fn abandon_operation(&self, operation: &PendingOperation) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let removed = sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(&operation.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "UPDATE offline_records SET pending_sync = 0
             WHERE collection = ? AND entity_id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM pending_operations
                   WHERE collection = ? AND entity_id = ?
               )",
        )
        .bind(&operation.collection)
        .bind(&operation.entity_id)
        .bind(&operation.collection)
        .bind(&operation.entity_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn count_operations(&self) -> Result<usize> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(self.pool())
            .await?;
        Ok(count.0.max(0) as usize)
    }

    /// Pending-sync snapshots with no queued operation for the same entity
    pub async fn orphaned_records(&self) -> Result<Vec<OfflineRecord>> {
        let rows = sqlx::query(
            "SELECT r.collection, r.entity_id, r.payload, r.offline, r.pending_sync,
                    r.offline_operation, r.stored_at
             FROM offline_records r
             WHERE r.pending_sync = 1
               AND NOT EXISTS (
                   SELECT 1 FROM pending_operations o
                   WHERE o.collection = r.collection AND o.entity_id = r.entity_id
               )
             ORDER BY r.stored_at ASC",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(OfflineRecord::from_row).collect()
    }

    /// Set sync metadata
    pub async fn set_sync_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get sync metadata
    pub async fn get_sync_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    /// Get last sync timestamp
    pub async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let value = self.get_sync_metadata(LAST_SYNC_TIME_KEY).await?;
        Ok(value
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    /// Set last sync timestamp
    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_sync_metadata(LAST_SYNC_TIME_KEY, &at.to_rfc3339()).await
    }
}
