//! Manual-override persistence.
//!
//! At most one active override exists per group; the partial unique
//! index enforces it and [`Store::put_override`] deactivates the
//! predecessor in the same transaction.

use super::types::{OverrideReason, OverrideRow, OverrideType};
use super::{now_ns, Store};
use crate::error::StoreError;
use rusqlite::{params, Row};
use std::path::PathBuf;

/// Path-keyed image of an active override, taken before a full rebuild.
#[derive(Debug, Clone)]
pub struct OverrideSnapshot {
    pub chosen_path: PathBuf,
    pub auto_path: Option<PathBuf>,
    pub override_type: OverrideType,
    pub reason: OverrideReason,
    pub note: Option<String>,
    pub created_at_ns: i64,
}

fn map_override_row(row: &Row<'_>) -> rusqlite::Result<OverrideRow> {
    let type_str: String = row.get(4)?;
    let reason_str: String = row.get(5)?;
    Ok(OverrideRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        chosen_file_id: row.get(2)?,
        auto_file_id: row.get(3)?,
        override_type: OverrideType::from_str(&type_str).unwrap_or(OverrideType::SingleGroup),
        reason: OverrideReason::from_str(&reason_str).unwrap_or(OverrideReason::UserPreference),
        created_at_ns: row.get(6)?,
        note: row.get(7)?,
        is_active: row.get(8)?,
    })
}

const OVERRIDE_COLUMNS: &str = "id, group_id, chosen_file_id, auto_file_id, override_type, \
                                reason, created_at_ns, note, is_active";

impl Store {
    /// Record a user decision, deactivating any predecessor for the group.
    pub fn put_override(
        &self,
        group_id: i64,
        chosen_file_id: i64,
        auto_file_id: i64,
        override_type: OverrideType,
        reason: OverrideReason,
        note: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.put_override_at(
            group_id,
            chosen_file_id,
            auto_file_id,
            override_type,
            reason,
            note,
            now_ns(),
        )
    }

    /// As [`Store::put_override`] with an explicit creation time, used
    /// when restoring overrides from a rebuild snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn put_override_at(
        &self,
        group_id: i64,
        chosen_file_id: i64,
        auto_file_id: i64,
        override_type: OverrideType,
        reason: OverrideReason,
        note: Option<&str>,
        created_at_ns: i64,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        tx.execute(
            "UPDATE manual_overrides SET is_active = 0 WHERE group_id = ?1 AND is_active = 1",
            [group_id],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        tx.execute(
            "INSERT INTO manual_overrides
             (group_id, chosen_file_id, auto_file_id, override_type, reason,
              created_at_ns, note, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
            params![
                group_id,
                chosen_file_id,
                auto_file_id,
                override_type.as_str(),
                reason.as_str(),
                created_at_ns,
                note,
            ],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let id = tx.last_insert_rowid();

        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(id)
    }

    /// Deactivate the active override for a group, if any.
    pub fn clear_override(&self, group_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE manual_overrides SET is_active = 0
                 WHERE group_id = ?1 AND is_active = 1",
                [group_id],
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(changed > 0)
    }

    /// The active override for a group, consulted on every grouping run.
    pub fn active_override(&self, group_id: i64) -> Result<Option<OverrideRow>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM manual_overrides WHERE group_id = ?1 AND is_active = 1",
                OVERRIDE_COLUMNS
            ),
            [group_id],
            map_override_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::QueryFailed(other.to_string())),
        })
    }

    /// Every active override, ordered by group.
    pub fn active_overrides(&self) -> Result<Vec<OverrideRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM manual_overrides WHERE is_active = 1 ORDER BY group_id",
                OVERRIDE_COLUMNS
            ))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mapped = stmt
            .query_map([], map_override_row)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
        }
        Ok(rows)
    }

    pub fn deactivate_override(&self, override_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE manual_overrides SET is_active = 0 WHERE id = ?1",
            [override_id],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Path-keyed images of active overrides, taken before a full rebuild.
    /// Overrides whose chosen file row is already gone are skipped.
    pub fn snapshot_overrides(&self) -> Result<Vec<OverrideSnapshot>, StoreError> {
        let rows = self.active_overrides()?;
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let chosen = match self.file_by_id(row.chosen_file_id) {
                Ok(file) => file.path,
                Err(StoreError::NotFound { .. }) => continue,
                Err(other) => return Err(other),
            };
            let auto = match self.file_by_id(row.auto_file_id) {
                Ok(file) => Some(file.path),
                Err(StoreError::NotFound { .. }) => None,
                Err(other) => return Err(other),
            };
            snapshots.push(OverrideSnapshot {
                chosen_path: chosen,
                auto_path: auto,
                override_type: row.override_type,
                reason: row.reason,
                note: row.note,
                created_at_ns: row.created_at_ns,
            });
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::open_store;
    use super::*;
    use std::path::Path;

    fn seed_file(store: &Store, path: &str) -> i64 {
        store.reconcile_file(Path::new(path), 100, 1).unwrap().0
    }

    #[test]
    fn put_then_lookup() {
        let store = open_store();
        let chosen = seed_file(&store, "/q/B.jpg");
        let auto = seed_file(&store, "/q/A.jpg");

        store
            .put_override(
                7,
                chosen,
                auto,
                OverrideType::SingleGroup,
                OverrideReason::UserPreference,
                Some("prefer the edited copy"),
            )
            .unwrap();

        let row = store.active_override(7).unwrap().unwrap();
        assert_eq!(row.chosen_file_id, chosen);
        assert_eq!(row.auto_file_id, auto);
        assert!(row.is_active);
    }

    #[test]
    fn second_put_replaces_first() {
        let store = open_store();
        let first = seed_file(&store, "/a.jpg");
        let second = seed_file(&store, "/b.jpg");

        store
            .put_override(
                1,
                first,
                second,
                OverrideType::SingleGroup,
                OverrideReason::UserPreference,
                None,
            )
            .unwrap();
        store
            .put_override(
                1,
                second,
                first,
                OverrideType::SingleGroup,
                OverrideReason::QualityBetter,
                None,
            )
            .unwrap();

        let row = store.active_override(1).unwrap().unwrap();
        assert_eq!(row.chosen_file_id, second);
        assert_eq!(row.reason, OverrideReason::QualityBetter);

        // Both rows exist, only one active
        let total: i64 = store
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM manual_overrides WHERE group_id = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn clear_deactivates() {
        let store = open_store();
        let chosen = seed_file(&store, "/a.jpg");

        store
            .put_override(
                3,
                chosen,
                chosen,
                OverrideType::SingleGroup,
                OverrideReason::ManualSelection,
                None,
            )
            .unwrap();
        assert!(store.clear_override(3).unwrap());
        assert!(store.active_override(3).unwrap().is_none());
        assert!(!store.clear_override(3).unwrap());
    }

    #[test]
    fn snapshot_resolves_paths() {
        let store = open_store();
        let chosen = seed_file(&store, "/q/B.jpg");
        let auto = seed_file(&store, "/q/A.jpg");
        store
            .put_override(
                1,
                chosen,
                auto,
                OverrideType::SingleGroup,
                OverrideReason::UserPreference,
                None,
            )
            .unwrap();

        let snapshots = store.snapshot_overrides().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].chosen_path, Path::new("/q/B.jpg"));
        assert_eq!(snapshots[0].auto_path.as_deref(), Some(Path::new("/q/A.jpg")));
    }

    #[test]
    fn snapshot_skips_dangling_chosen_file() {
        let store = open_store();
        let chosen = seed_file(&store, "/gone.jpg");
        store
            .put_override(
                1,
                chosen,
                chosen,
                OverrideType::SingleGroup,
                OverrideReason::UserPreference,
                None,
            )
            .unwrap();
        store
            .conn()
            .unwrap()
            .execute("DELETE FROM files WHERE id = ?1", [chosen])
            .unwrap();

        assert!(store.snapshot_overrides().unwrap().is_empty());
    }
}
