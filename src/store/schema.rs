//! Schema definition and forward migrations.
//!
//! The installed schema generation lives in the single-cell
//! `schema_version` table. [`apply_migrations`] is idempotent: it reads
//! the cell and applies every migration above it in order, each inside
//! its own transaction.

use crate::error::StoreError;
use rusqlite::Connection;
use tracing::info;

/// Schema generation this build writes.
pub const SCHEMA_VERSION: i64 = 1;

const MIGRATION_V1: &str = r#"
CREATE TABLE files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    fast_hash INTEGER,
    strong_hash BLOB,
    is_missing INTEGER NOT NULL DEFAULT 0,
    missing_since_ns INTEGER,
    is_unprocessable INTEGER NOT NULL DEFAULT 0,
    needs_features INTEGER NOT NULL DEFAULT 1,
    discovered_at_ns INTEGER NOT NULL
);

CREATE INDEX idx_files_size_fast_hash ON files(size, fast_hash);

CREATE TABLE features (
    file_id INTEGER PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
    phash INTEGER,
    dhash INTEGER,
    ahash INTEGER,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    taken_at_ns INTEGER,
    camera_make TEXT,
    camera_model TEXT,
    orientation INTEGER,
    generated_at_ns INTEGER NOT NULL
);

CREATE TABLE groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tier TEXT NOT NULL CHECK (tier IN ('exact', 'near')),
    confidence REAL NOT NULL,
    created_at_ns INTEGER NOT NULL,
    updated_at_ns INTEGER NOT NULL
);

CREATE TABLE group_members (
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK (role IN ('original', 'duplicate', 'safe_duplicate')),
    similarity REAL NOT NULL,
    note TEXT,
    PRIMARY KEY (group_id, file_id)
);

CREATE UNIQUE INDEX idx_group_members_one_original
    ON group_members(group_id) WHERE role = 'original';
CREATE INDEX idx_group_members_file ON group_members(file_id);

CREATE TABLE manual_overrides (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    chosen_file_id INTEGER NOT NULL,
    auto_file_id INTEGER NOT NULL,
    override_type TEXT NOT NULL
        CHECK (override_type IN ('single_group', 'default_rule')),
    reason TEXT NOT NULL
        CHECK (reason IN ('user_preference', 'quality_better',
                          'format_preference', 'manual_selection',
                          'algorithm_error')),
    created_at_ns INTEGER NOT NULL,
    note TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE UNIQUE INDEX idx_manual_overrides_active
    ON manual_overrides(group_id, is_active) WHERE is_active = 1;
"#;

/// Ordered forward migrations; index 0 takes an empty database to v1.
const MIGRATIONS: &[&str] = &[MIGRATION_V1];

/// Read the installed schema version, 0 for a fresh database.
pub fn installed_version(conn: &Connection) -> Result<i64, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::QueryFailed(other.to_string())),
        })?;

    Ok(version.unwrap_or(0))
}

/// Apply every migration above the installed version. Blocks readers for
/// the duration; this is the only store operation allowed to do so.
pub fn apply_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let installed = installed_version(conn)?;

    for (index, sql) in MIGRATIONS.iter().enumerate() {
        let target = index as i64 + 1;
        if target <= installed {
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        tx.execute_batch(sql).map_err(|e| StoreError::MigrationFailed {
            version: target,
            reason: e.to_string(),
        })?;
        tx.execute("DELETE FROM schema_version", [])
            .map_err(|e| StoreError::MigrationFailed {
                version: target,
                reason: e.to_string(),
            })?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [target])
            .map_err(|e| StoreError::MigrationFailed {
                version: target,
                reason: e.to_string(),
            })?;
        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        info!(version = target, "applied store migration");
    }

    Ok(())
}
