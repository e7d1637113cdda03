//! Root walking and store reconciliation.

use super::filter::PathFilter;
use crate::error::ScanError;
use crate::events::{Event, EventSender, ScanEvent};
use crate::store::{ScanOutcome, Store};
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-root reconciliation tally. Roots are scanned as independent pool
/// tasks; the coordinator merges their reports.
#[derive(Debug, Default)]
pub struct RootScan {
    pub discovered: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Paths seen on disk this pass, input to missing detection
    pub seen: HashSet<PathBuf>,
    /// Per-entry errors; the scan continued past each one
    pub errors: Vec<String>,
}

impl RootScan {
    pub fn merge(&mut self, other: RootScan) {
        self.discovered += other.discovered;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.seen.extend(other.seen);
        self.errors.extend(other.errors);
    }

    pub fn files_seen(&self) -> usize {
        self.seen.len()
    }
}

fn mtime_ns(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Filesystem walker that reconciles one root at a time.
pub struct Scanner {
    filter: PathFilter,
}

impl Scanner {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter }
    }

    /// Walk one root and reconcile every included file with the store.
    ///
    /// Restartable: reconciliation is idempotent per file, so an
    /// interrupted walk repeats at most the directory it was in.
    pub fn scan_root(
        &self,
        store: &Store,
        root: &Path,
        events: &EventSender,
    ) -> Result<RootScan, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::RootNotFound {
                path: root.to_path_buf(),
            });
        }

        let mut report = RootScan::default();

        for entry_result in WalkDir::new(root).follow_links(false) {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    let error = if e.io_error().map(|io| io.kind())
                        == Some(std::io::ErrorKind::PermissionDenied)
                    {
                        ScanError::PermissionDenied { path: path.clone() }
                    } else {
                        ScanError::ReadEntry {
                            path: path.clone(),
                            source: std::io::Error::other(e.to_string()),
                        }
                    };
                    warn!(path = %path.display(), error = %error, "scan entry skipped");
                    events.send(Event::Scan(ScanEvent::Error {
                        path,
                        message: error.to_string(),
                    }));
                    report.errors.push(error.to_string());
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                // Hidden directories are pruned at the file filter level;
                // nothing to reconcile for the directory itself
                continue;
            }
            if !self.filter.should_include(path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    let error = ScanError::ReadEntry {
                        path: path.to_path_buf(),
                        source: std::io::Error::other(e.to_string()),
                    };
                    events.send(Event::Scan(ScanEvent::Error {
                        path: path.to_path_buf(),
                        message: error.to_string(),
                    }));
                    report.errors.push(error.to_string());
                    continue;
                }
            };

            let size = metadata.len();
            let mtime = mtime_ns(&metadata);
            match store.reconcile_file(path, size, mtime) {
                Ok((_, ScanOutcome::Discovered)) => {
                    report.discovered += 1;
                    events.send(Event::Scan(ScanEvent::FileDiscovered {
                        path: path.to_path_buf(),
                    }));
                }
                Ok((_, ScanOutcome::Changed)) => {
                    report.changed += 1;
                    events.send(Event::Scan(ScanEvent::FileChanged {
                        path: path.to_path_buf(),
                    }));
                }
                Ok((_, ScanOutcome::Unchanged)) => report.unchanged += 1,
                Err(e) => {
                    // Store trouble on one row; keep walking
                    warn!(path = %path.display(), error = %e, "reconciliation failed");
                    report.errors.push(e.to_string());
                    continue;
                }
            }
            report.seen.insert(path.to_path_buf());
        }

        debug!(
            root = %root.display(),
            discovered = report.discovered,
            changed = report.changed,
            unchanged = report.unchanged,
            "root scan complete"
        );
        Ok(report)
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(PathFilter::new())
    }
}

/// Mark files under the scanned roots that were not seen on disk as
/// missing. Returns the affected file ids.
pub fn detect_missing(
    store: &Store,
    roots: &[PathBuf],
    seen: &HashSet<PathBuf>,
    events: &EventSender,
) -> Result<Vec<i64>, crate::error::StoreError> {
    let mut vanished = Vec::new();
    for (id, path) in store.known_paths()? {
        let under_scanned_root = roots.iter().any(|root| path.starts_with(root));
        if under_scanned_root && !seen.contains(&path) {
            vanished.push(id);
            events.send(Event::Scan(ScanEvent::FileMissing { path }));
        }
    }

    if !vanished.is_empty() {
        store.mark_missing(&vanished)?;
    }
    Ok(vanished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::null_sender;
    use crate::store::test_support::open_store;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn empty_root_scans_clean() {
        let dir = TempDir::new().unwrap();
        let store = open_store();

        let report = Scanner::default()
            .scan_root(&store, dir.path(), &null_sender())
            .unwrap();
        assert_eq!(report.files_seen(), 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let store = open_store();
        let result = Scanner::default().scan_root(
            &store,
            Path::new("/nonexistent/root/xyz"),
            &null_sender(),
        );
        assert!(matches!(result, Err(ScanError::RootNotFound { .. })));
    }

    #[test]
    fn first_scan_discovers_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jpg", b"aaa");
        touch(dir.path(), "b.png", b"bbb");
        touch(dir.path(), "notes.txt", b"not an image");

        let store = open_store();
        let report = Scanner::default()
            .scan_root(&store, dir.path(), &null_sender())
            .unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.unchanged, 0);
        assert_eq!(store.stats().unwrap().files, 2);
    }

    #[test]
    fn second_scan_is_all_unchanged() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jpg", b"aaa");

        let store = open_store();
        let scanner = Scanner::default();
        scanner.scan_root(&store, dir.path(), &null_sender()).unwrap();
        let second = scanner.scan_root(&store, dir.path(), &null_sender()).unwrap();

        assert_eq!(second.discovered, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn nested_directories_are_walked() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("2023/trip")).unwrap();
        touch(dir.path(), "root.jpg", b"r");
        touch(&dir.path().join("2023/trip"), "nested.jpg", b"n");

        let store = open_store();
        let report = Scanner::default()
            .scan_root(&store, dir.path(), &null_sender())
            .unwrap();
        assert_eq!(report.discovered, 2);
    }

    #[test]
    fn content_change_is_reported_changed() {
        let dir = TempDir::new().unwrap();
        let path = touch(dir.path(), "a.jpg", b"v1");

        let store = open_store();
        let scanner = Scanner::default();
        scanner.scan_root(&store, dir.path(), &null_sender()).unwrap();

        fs::write(&path, b"v2 with more bytes").unwrap();
        let second = scanner.scan_root(&store, dir.path(), &null_sender()).unwrap();
        assert_eq!(second.changed, 1);
    }

    #[test]
    fn vanished_file_is_marked_missing() {
        let dir = TempDir::new().unwrap();
        let keep = touch(dir.path(), "keep.jpg", b"k");
        let gone = touch(dir.path(), "gone.jpg", b"g");

        let store = open_store();
        let scanner = Scanner::default();
        scanner.scan_root(&store, dir.path(), &null_sender()).unwrap();

        fs::remove_file(&gone).unwrap();
        let report = scanner.scan_root(&store, dir.path(), &null_sender()).unwrap();

        let vanished = detect_missing(
            &store,
            &[dir.path().to_path_buf()],
            &report.seen,
            &null_sender(),
        )
        .unwrap();
        assert_eq!(vanished.len(), 1);

        let gone_row = store.file_by_path(&gone).unwrap().unwrap();
        assert!(gone_row.is_missing);
        let keep_row = store.file_by_path(&keep).unwrap().unwrap();
        assert!(!keep_row.is_missing);
    }

    #[test]
    fn files_outside_roots_are_not_marked_missing() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        touch(dir_a.path(), "a.jpg", b"a");
        touch(dir_b.path(), "b.jpg", b"b");

        let store = open_store();
        let scanner = Scanner::default();
        scanner.scan_root(&store, dir_a.path(), &null_sender()).unwrap();
        scanner.scan_root(&store, dir_b.path(), &null_sender()).unwrap();

        // Rescan only root A; B's file must stay untouched
        let report = scanner.scan_root(&store, dir_a.path(), &null_sender()).unwrap();
        let vanished = detect_missing(
            &store,
            &[dir_a.path().to_path_buf()],
            &report.seen,
            &null_sender(),
        )
        .unwrap();
        assert!(vanished.is_empty());
    }
}
