//! File-table operations: scanner reconciliation, flag updates, lookups.

use super::types::FileRow;
use super::{now_ns, Store};
use crate::error::StoreError;
use rusqlite::{params, Row};
use std::path::{Path, PathBuf};

/// What reconciliation decided about one scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Path was unknown; a row was inserted and flagged needs-features
    Discovered,
    /// Size and mtime match the stored row
    Unchanged,
    /// Size or mtime differ; features were invalidated
    Changed,
}

fn map_file_row(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        size: row.get::<_, i64>(2)? as u64,
        mtime_ns: row.get(3)?,
        fast_hash: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        strong_hash: row.get(5)?,
        is_missing: row.get(6)?,
        missing_since_ns: row.get(7)?,
        is_unprocessable: row.get(8)?,
        needs_features: row.get(9)?,
        discovered_at_ns: row.get(10)?,
    })
}

const FILE_COLUMNS: &str = "id, path, size, mtime_ns, fast_hash, strong_hash, \
                            is_missing, missing_since_ns, is_unprocessable, \
                            needs_features, discovered_at_ns";

impl Store {
    /// Reconcile one scanned (path, size, mtime) tuple against the table.
    ///
    /// Unknown paths are inserted and flagged needs-features. A size or
    /// mtime change updates the row, deletes the stale feature row, and
    /// re-flags needs-features. A file previously marked missing that
    /// reappears unchanged has only its missing flag cleared.
    pub fn reconcile_file(
        &self,
        path: &Path,
        size: u64,
        mtime_ns: i64,
    ) -> Result<(i64, ScanOutcome), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        let path_str = path.to_string_lossy();
        let existing: Option<(i64, i64, i64)> = tx
            .query_row(
                "SELECT id, size, mtime_ns FROM files WHERE path = ?1",
                [&path_str],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::QueryFailed(other.to_string())),
            })?;

        let result = match existing {
            None => {
                tx.execute(
                    "INSERT INTO files (path, size, mtime_ns, discovered_at_ns)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![path_str, size as i64, mtime_ns, now_ns()],
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                (tx.last_insert_rowid(), ScanOutcome::Discovered)
            }
            Some((id, stored_size, stored_mtime))
                if stored_size == size as i64 && stored_mtime == mtime_ns =>
            {
                tx.execute(
                    "UPDATE files SET is_missing = 0, missing_since_ns = NULL WHERE id = ?1",
                    [id],
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                (id, ScanOutcome::Unchanged)
            }
            Some((id, _, _)) => {
                tx.execute(
                    "UPDATE files
                     SET size = ?2, mtime_ns = ?3, fast_hash = NULL, strong_hash = NULL,
                         needs_features = 1, is_unprocessable = 0,
                         is_missing = 0, missing_since_ns = NULL
                     WHERE id = ?1",
                    params![id, size as i64, mtime_ns],
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                tx.execute("DELETE FROM features WHERE file_id = ?1", [id])
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                (id, ScanOutcome::Changed)
            }
        };

        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(result)
    }

    pub fn file_by_id(&self, id: i64) -> Result<FileRow, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
            [id],
            map_file_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "file",
                id,
            },
            other => StoreError::QueryFailed(other.to_string()),
        })
    }

    pub fn file_by_path(&self, path: &Path) -> Result<Option<FileRow>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM files WHERE path = ?1", FILE_COLUMNS),
            [path.to_string_lossy()],
            map_file_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::QueryFailed(other.to_string())),
        })
    }

    /// Bulk lookup by id set, chunked to stay under the bind limit.
    pub fn files_by_ids(&self, ids: &[i64]) -> Result<Vec<FileRow>, StoreError> {
        let conn = self.conn()?;
        let mut rows = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM files WHERE id IN ({})",
                FILE_COLUMNS, placeholders
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let mapped = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), map_file_row)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            for row in mapped {
                rows.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
            }
        }

        Ok(rows)
    }

    /// Known non-missing paths, for scanner absence detection.
    pub fn known_paths(&self) -> Result<Vec<(i64, PathBuf)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, path FROM files WHERE is_missing = 0")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mapped = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, PathBuf::from(row.get::<_, String>(1)?)))
            })
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut paths = Vec::new();
        for row in mapped {
            paths.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
        }
        Ok(paths)
    }

    /// Soft-delete: flip the missing flag, record when.
    pub fn mark_missing(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        let now = now_ns();
        for id in ids {
            tx.execute(
                "UPDATE files SET is_missing = 1, missing_since_ns = ?2
                 WHERE id = ?1 AND is_missing = 0",
                params![id, now],
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }

    /// Files flagged needs-features that are still present and processable.
    pub fn files_needing_features(&self) -> Result<Vec<FileRow>, StoreError> {
        self.select_files(
            "WHERE needs_features = 1 AND is_missing = 0 AND is_unprocessable = 0
             ORDER BY id",
        )
    }

    /// Files with no feature row at all, regardless of the needs-features
    /// flag. Used by the missing-features rescan mode after a crash left
    /// flags unreliable.
    pub fn files_lacking_features(&self) -> Result<Vec<FileRow>, StoreError> {
        self.select_files(
            "LEFT JOIN features ON features.file_id = files.id
             WHERE features.file_id IS NULL
               AND is_missing = 0 AND is_unprocessable = 0
             ORDER BY files.id",
        )
    }

    /// Present, processable files in stable id order: grouping input.
    pub fn groupable_files(&self) -> Result<Vec<FileRow>, StoreError> {
        self.select_files("WHERE is_missing = 0 AND is_unprocessable = 0 ORDER BY id")
    }

    fn select_files(&self, tail: &str) -> Result<Vec<FileRow>, StoreError> {
        let conn = self.conn()?;
        let columns: String = FILE_COLUMNS
            .split(", ")
            .map(|c| format!("files.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM files {}", columns, tail);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mapped = stmt
            .query_map([], map_file_row)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
        }
        Ok(rows)
    }

    /// Stream every file row without materializing the table.
    pub fn for_each_file<F>(&self, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(FileRow),
    {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM files ORDER BY id", FILE_COLUMNS);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mapped = stmt
            .query_map([], map_file_row)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        for row in mapped {
            visit(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
        }
        Ok(())
    }

    pub fn set_fast_hash(&self, file_id: i64, hash: u64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET fast_hash = ?2 WHERE id = ?1",
            params![file_id, hash as i64],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    pub fn set_strong_hash(&self, file_id: i64, hash: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET strong_hash = ?2 WHERE id = ?1",
            params![file_id, hash],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Record a decode or retry failure. The flag holds until the file's
    /// size or mtime changes, at which point reconciliation clears it.
    pub fn set_unprocessable(&self, file_id: i64, unprocessable: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET is_unprocessable = ?2 WHERE id = ?1",
            params![file_id, unprocessable],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Persist a feature row and clear the needs-features flag in one
    /// transaction.
    pub fn put_feature(&self, feature: &super::FeatureRow) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO features
             (file_id, phash, dhash, ahash, width, height, taken_at_ns,
              camera_make, camera_model, orientation, generated_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                feature.file_id,
                feature.phash.map(|v| v as i64),
                feature.dhash.map(|v| v as i64),
                feature.ahash.map(|v| v as i64),
                feature.width,
                feature.height,
                feature.taken_at_ns,
                feature.camera_make,
                feature.camera_model,
                feature.orientation,
                feature.generated_at_ns,
            ],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        tx.execute(
            "UPDATE files SET needs_features = 0 WHERE id = ?1",
            [feature.file_id],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }

    /// Drop a file's feature row and re-flag it for extraction.
    pub fn delete_feature(&self, file_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        tx.execute("DELETE FROM features WHERE file_id = ?1", [file_id])
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        tx.execute(
            "UPDATE files SET needs_features = 1 WHERE id = ?1",
            [file_id],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }

    pub fn feature_by_file_id(&self, file_id: i64) -> Result<Option<super::FeatureRow>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT file_id, phash, dhash, ahash, width, height, taken_at_ns,
                    camera_make, camera_model, orientation, generated_at_ns
             FROM features WHERE file_id = ?1",
            [file_id],
            map_feature_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::QueryFailed(other.to_string())),
        })
    }

    /// Stream every feature row belonging to a present, processable file.
    pub fn for_each_feature<F>(&self, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(super::FeatureRow),
    {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT f.file_id, f.phash, f.dhash, f.ahash, f.width, f.height,
                        f.taken_at_ns, f.camera_make, f.camera_model, f.orientation,
                        f.generated_at_ns
                 FROM features f
                 JOIN files fi ON fi.id = f.file_id
                 WHERE fi.is_missing = 0 AND fi.is_unprocessable = 0
                 ORDER BY f.file_id",
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mapped = stmt
            .query_map([], map_feature_row)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        for row in mapped {
            visit(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
        }
        Ok(())
    }

    /// Bulk feature lookup by file id set.
    pub fn features_by_file_ids(
        &self,
        file_ids: &[i64],
    ) -> Result<Vec<super::FeatureRow>, StoreError> {
        let conn = self.conn()?;
        let mut rows = Vec::with_capacity(file_ids.len());

        for chunk in file_ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT file_id, phash, dhash, ahash, width, height, taken_at_ns,
                        camera_make, camera_model, orientation, generated_at_ns
                 FROM features WHERE file_id IN ({})",
                placeholders
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let mapped = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), map_feature_row)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            for row in mapped {
                rows.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
            }
        }

        Ok(rows)
    }

    /// Purge rows that have been missing longer than the cutoff. Feature
    /// and membership rows follow via cascade.
    pub fn vacuum_missing(&self, missing_before_ns: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM files WHERE is_missing = 1 AND missing_since_ns < ?1",
            [missing_before_ns],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }
}

fn map_feature_row(row: &Row<'_>) -> rusqlite::Result<super::FeatureRow> {
    Ok(super::FeatureRow {
        file_id: row.get(0)?,
        phash: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
        dhash: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
        ahash: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        width: row.get(4)?,
        height: row.get(5)?,
        taken_at_ns: row.get(6)?,
        camera_make: row.get(7)?,
        camera_model: row.get(8)?,
        orientation: row.get(9)?,
        generated_at_ns: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::open_store;
    use super::super::FeatureRow;
    use super::*;

    fn seed_feature(file_id: i64) -> FeatureRow {
        FeatureRow {
            file_id,
            phash: Some(0xDEAD_BEEF),
            dhash: Some(0x1234),
            ahash: Some(0x5678),
            width: 640,
            height: 480,
            taken_at_ns: None,
            camera_make: None,
            camera_model: None,
            orientation: Some(1),
            generated_at_ns: 1,
        }
    }

    #[test]
    fn unknown_path_is_discovered() {
        let store = open_store();
        let (id, outcome) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 42)
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Discovered);

        let row = store.file_by_id(id).unwrap();
        assert!(row.needs_features);
        assert_eq!(row.size, 100);
        assert_eq!(row.mtime_ns, 42);
    }

    #[test]
    fn matching_stat_is_unchanged() {
        let store = open_store();
        let (id, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 42)
            .unwrap();
        let (id2, outcome) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 42)
            .unwrap();
        assert_eq!(id, id2);
        assert_eq!(outcome, ScanOutcome::Unchanged);
    }

    #[test]
    fn changed_stat_invalidates_features() {
        let store = open_store();
        let (id, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 42)
            .unwrap();
        store.put_feature(&seed_feature(id)).unwrap();
        assert!(!store.file_by_id(id).unwrap().needs_features);

        let (_, outcome) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 43)
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Changed);

        let row = store.file_by_id(id).unwrap();
        assert!(row.needs_features);
        assert!(store.feature_by_file_id(id).unwrap().is_none());
    }

    #[test]
    fn missing_file_resurfaces_clean() {
        let store = open_store();
        let (id, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 42)
            .unwrap();
        store.mark_missing(&[id]).unwrap();
        assert!(store.file_by_id(id).unwrap().is_missing);

        let (_, outcome) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 42)
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Unchanged);
        let row = store.file_by_id(id).unwrap();
        assert!(!row.is_missing);
        assert!(row.missing_since_ns.is_none());
    }

    #[test]
    fn needing_features_excludes_unprocessable() {
        let store = open_store();
        let (a, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 1)
            .unwrap();
        let (b, _) = store
            .reconcile_file(Path::new("/photos/b.jpg"), 100, 1)
            .unwrap();
        store.set_unprocessable(b, true).unwrap();

        let needing: Vec<i64> = store
            .files_needing_features()
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(needing, vec![a]);
    }

    #[test]
    fn lacking_features_ignores_flags() {
        let store = open_store();
        let (a, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 1)
            .unwrap();
        let (b, _) = store
            .reconcile_file(Path::new("/photos/b.jpg"), 100, 1)
            .unwrap();
        store.put_feature(&seed_feature(a)).unwrap();

        // Simulate a crash that left the flag clear without a feature row
        store
            .conn()
            .unwrap()
            .execute("UPDATE files SET needs_features = 0 WHERE id = ?1", [b])
            .unwrap();

        let lacking: Vec<i64> = store
            .files_lacking_features()
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(lacking, vec![b]);
    }

    #[test]
    fn fast_hash_round_trips_high_bit() {
        let store = open_store();
        let (id, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 1)
            .unwrap();
        store.set_fast_hash(id, u64::MAX - 3).unwrap();
        assert_eq!(store.file_by_id(id).unwrap().fast_hash, Some(u64::MAX - 3));
    }

    #[test]
    fn bulk_lookup_spans_chunks() {
        let store = open_store();
        let mut ids = Vec::new();
        for i in 0..600 {
            let (id, _) = store
                .reconcile_file(Path::new(&format!("/photos/{}.jpg", i)), 10, 1)
                .unwrap();
            ids.push(id);
        }
        let rows = store.files_by_ids(&ids).unwrap();
        assert_eq!(rows.len(), 600);
    }

    #[test]
    fn vacuum_purges_long_missing_rows() {
        let store = open_store();
        let (id, _) = store
            .reconcile_file(Path::new("/photos/a.jpg"), 100, 1)
            .unwrap();
        store.mark_missing(&[id]).unwrap();

        let purged = store.vacuum_missing(i64::MAX).unwrap();
        assert_eq!(purged, 1);
        assert!(store.file_by_path(Path::new("/photos/a.jpg")).unwrap().is_none());
    }
}
