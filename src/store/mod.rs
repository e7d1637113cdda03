//! # Store Module
//!
//! Single-file embedded SQLite database holding all engine state: files,
//! features, groups, memberships, manual overrides, and the schema
//! version.
//!
//! WAL mode keeps readers concurrent while a writer is active. All public
//! operations are transactional; a failed transaction leaves no partial
//! state. Schema migration is the only operation allowed to block
//! readers.

mod files;
mod groups;
mod overrides;
pub mod schema;
mod types;

pub use files::ScanOutcome;
pub use groups::{GroupSnapshot, GroupSummary, MemberSummary, NewMember};
pub use overrides::OverrideSnapshot;
pub use types::{
    FeatureRow, FileRow, GroupMemberRow, GroupRow, MemberRole, OverrideReason, OverrideRow,
    OverrideType, StoreStats, Tier,
};

use crate::error::StoreError;
use chrono::Utc;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Handle to the embedded database. Clonable across threads via `Arc`;
/// the connection is serialized internally.
pub struct Store {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Store {
    /// Open or create the database at `path` and enable WAL.
    /// Call [`Store::migrate`] before first use.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::configure(conn, path.to_path_buf())
    }

    /// In-memory store, used by tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::configure(conn, PathBuf::from(":memory:"))
    }

    fn configure(conn: Connection, db_path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA synchronous=NORMAL;",
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Default location for the store database under the user data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photo-dedupe")
            .join("dedupe.db")
    }

    /// Apply forward migrations up to the current schema generation.
    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        schema::apply_migrations(&mut conn)
    }

    /// Installed schema generation, 0 for a fresh database.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        schema::installed_version(&conn)
    }

    /// Aggregate row counts, consumed by the rescan mode recommendation.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;

        let count = |sql: &str| -> Result<usize, StoreError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|v| v as usize)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))
        };

        Ok(StoreStats {
            files: count("SELECT COUNT(*) FROM files")?,
            live_files: count(
                "SELECT COUNT(*) FROM files WHERE is_missing = 0 AND is_unprocessable = 0",
            )?,
            features: count(
                "SELECT COUNT(*) FROM features f
                 JOIN files fi ON fi.id = f.file_id
                 WHERE fi.is_missing = 0 AND fi.is_unprocessable = 0",
            )?,
            groups: count("SELECT COUNT(*) FROM groups")?,
            members: count("SELECT COUNT(*) FROM group_members")?,
            active_overrides: count(
                "SELECT COUNT(*) FROM manual_overrides WHERE is_active = 1",
            )?,
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Corrupted {
            path: self.db_path.clone(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("state").join("dedupe.db");

        let store = Store::open(&db_path).unwrap();
        store.migrate().unwrap();

        assert!(db_path.exists());
        assert_eq!(store.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn stats_on_empty_store() {
        let store = test_support::open_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.feature_coverage(), 1.0);
    }

    #[test]
    fn now_ns_is_monotone_enough() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
