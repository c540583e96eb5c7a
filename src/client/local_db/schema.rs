//! Database Schema Definitions
//!
//! Contains the table definitions for the local durable store and the
//! schema version bookkeeping.

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Schema migration versions
pub const MIGRATION_VERSIONS: &[i32] = &[1];

/// Statements creating the version 1 schema. Each entry is executed on its own.
pub const SCHEMA_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS offline_records (
        collection TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        offline INTEGER NOT NULL DEFAULT 1,
        pending_sync INTEGER NOT NULL DEFAULT 0,
        offline_operation TEXT NOT NULL,
        stored_at TEXT NOT NULL,
        PRIMARY KEY (collection, entity_id)
    )",
    "CREATE TABLE IF NOT EXISTS pending_operations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        op_type TEXT NOT NULL,
        collection TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        pre_image TEXT,
        enqueued_at TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL,
        last_error TEXT,
        last_attempt TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_pending_operations_entity
        ON pending_operations (collection, entity_id)",
    "CREATE TABLE IF NOT EXISTS sync_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL
    )",
];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i32) -> Vec<i32> {
    MIGRATION_VERSIONS
        .iter()
        .filter(|&&v| v > current_version)
        .cloned()
        .collect()
}
