//! # Feature Extractor Module
//!
//! Turns one file into its persisted fingerprints: fast content hash,
//! the three perceptual hashes, dimensions, and the EXIF subset, written
//! as a single feature-row transaction.
//!
//! Failure handling follows the pipeline contract: decode failures mark
//! the file unprocessable (skipped by grouping until its size or mtime
//! changes); transient I/O errors are retried a bounded number of times
//! and then treated the same way for the current run.

use crate::core::content::{fast_content_hash, strong_content_hash};
use crate::core::hasher::{compute_hashes, decode_bounded};
use crate::core::metadata::read_exif;
use crate::core::scanner::ImageFormat;
use crate::error::{FeatureError, StoreError};
use crate::events::{Event, EventSender, FeatureEvent};
use crate::settings::Settings;
use crate::store::{FeatureRow, FileRow, Store};
use chrono::Utc;
use std::path::Path;
use tracing::{debug, warn};

/// Transient I/O errors get this many attempts before the file is
/// declared unprocessable for the run.
const MAX_ATTEMPTS: u32 = 3;

/// What extraction decided about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Features were computed and persisted
    Computed,
    /// The file was flagged unprocessable; the string says why
    Unprocessable(String),
}

/// Per-run extractor, configured from the settings snapshot.
pub struct FeatureExtractor {
    max_decode_edge: u32,
    skip_raw: bool,
    skip_tiff: bool,
}

impl FeatureExtractor {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_decode_edge: settings.hashing.max_decode_edge,
            skip_raw: settings.formats.skip_raw_formats,
            skip_tiff: settings.formats.skip_tiff_formats,
        }
    }

    /// Process one file end to end. Store failures propagate; per-file
    /// failures are absorbed into the outcome.
    pub fn process(
        &self,
        store: &Store,
        file: &FileRow,
        events: &EventSender,
    ) -> Result<ExtractOutcome, StoreError> {
        if let Some(reason) = self.format_rejection(&file.path) {
            return self.reject(store, file, reason, events);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.extract(&file.path) {
                Ok((fast_hash, mut feature)) => {
                    feature.file_id = file.id;
                    store.set_fast_hash(file.id, fast_hash)?;
                    store.put_feature(&feature)?;
                    events.send(Event::Feature(FeatureEvent::Computed {
                        path: file.path.clone(),
                    }));
                    debug!(path = %file.path.display(), "features computed");
                    return Ok(ExtractOutcome::Computed);
                }
                Err(error) if error.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        path = %file.path.display(),
                        attempt,
                        error = %error,
                        "transient extraction failure, retrying"
                    );
                }
                Err(error) => {
                    let reason = if error.is_transient() {
                        FeatureError::RetriesExhausted {
                            path: file.path.clone(),
                            attempts: attempt,
                        }
                        .to_string()
                    } else {
                        error.to_string()
                    };
                    return self.reject(store, file, reason, events);
                }
            }
        }
    }

    /// The per-file pipeline: fast hash, EXIF, bounded decode, perceptual
    /// hashes.
    fn extract(&self, path: &Path) -> Result<(u64, FeatureRow), FeatureError> {
        let fast_hash = fast_content_hash(path)?;
        let exif = read_exif(path);
        let decoded = decode_bounded(path, self.max_decode_edge, exif.orientation)?;

        let hashes = compute_hashes(&decoded.gray).map_err(|reason| FeatureError::Decode {
            path: path.to_path_buf(),
            reason,
        })?;

        let feature = FeatureRow {
            file_id: 0, // Filled by the caller
            phash: Some(hashes.phash),
            dhash: Some(hashes.dhash),
            ahash: Some(hashes.ahash),
            width: decoded.width,
            height: decoded.height,
            taken_at_ns: exif.taken_at_ns,
            camera_make: exif.camera_make,
            camera_model: exif.camera_model,
            orientation: exif.orientation,
            generated_at_ns: Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
        };
        Ok((fast_hash, feature))
    }

    fn format_rejection(&self, path: &Path) -> Option<String> {
        let format = ImageFormat::from_path(path);
        match format {
            ImageFormat::Raw if self.skip_raw => {
                Some("raw formats are disabled by the active preset".to_string())
            }
            ImageFormat::Tiff if self.skip_tiff => {
                Some("tiff formats are disabled by the active preset".to_string())
            }
            ImageFormat::Unknown => Some("unsupported image format".to_string()),
            _ => None,
        }
    }

    fn reject(
        &self,
        store: &Store,
        file: &FileRow,
        reason: String,
        events: &EventSender,
    ) -> Result<ExtractOutcome, StoreError> {
        store.set_unprocessable(file.id, true)?;
        events.send(Event::Feature(FeatureEvent::Unprocessable {
            path: file.path.clone(),
            reason: reason.clone(),
        }));
        Ok(ExtractOutcome::Unprocessable(reason))
    }
}

/// Fetch the strong content hash for a file, computing and persisting it
/// on first request. Returns None when the bytes cannot be read, which
/// grouping treats as "confirmation unavailable, keep the file apart".
pub fn ensure_strong_hash(store: &Store, file: &FileRow) -> Result<Option<Vec<u8>>, StoreError> {
    if let Some(existing) = &file.strong_hash {
        return Ok(Some(existing.clone()));
    }

    match strong_content_hash(&file.path) {
        Ok(hash) => {
            store.set_strong_hash(file.id, &hash)?;
            Ok(Some(hash))
        }
        Err(error) => {
            warn!(path = %file.path.display(), error = %error, "strong hash unavailable");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::null_sender;
    use crate::store::test_support::open_store;
    use image::RgbImage;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        })
        .save(&path)
        .unwrap();
        path
    }

    fn seed(store: &Store, path: &Path) -> FileRow {
        let metadata = fs::metadata(path).unwrap();
        let (id, _) = store
            .reconcile_file(path, metadata.len(), 1)
            .unwrap();
        store.file_by_id(id).unwrap()
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::from_settings(&Settings::default())
    }

    #[test]
    fn valid_image_produces_feature_row() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "photo.png", 320, 200);
        let store = open_store();
        let file = seed(&store, &path);

        let outcome = extractor().process(&store, &file, &null_sender()).unwrap();
        assert_eq!(outcome, ExtractOutcome::Computed);

        let feature = store.feature_by_file_id(file.id).unwrap().unwrap();
        assert_eq!((feature.width, feature.height), (320, 200));
        assert!(feature.phash.is_some());
        assert!(feature.dhash.is_some());
        assert!(feature.ahash.is_some());

        let row = store.file_by_id(file.id).unwrap();
        assert!(row.fast_hash.is_some());
        assert!(!row.needs_features);
    }

    #[test]
    fn corrupt_image_becomes_unprocessable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"not a jpeg at all").unwrap();
        let store = open_store();
        let file = seed(&store, &path);

        let outcome = extractor().process(&store, &file, &null_sender()).unwrap();
        assert!(matches!(outcome, ExtractOutcome::Unprocessable(_)));
        assert!(store.file_by_id(file.id).unwrap().is_unprocessable);
    }

    #[test]
    fn raw_format_respects_preset_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.nef");
        fs::write(&path, b"raw sensor bytes").unwrap();
        let store = open_store();
        let file = seed(&store, &path);

        let outcome = extractor().process(&store, &file, &null_sender()).unwrap();
        assert!(matches!(outcome, ExtractOutcome::Unprocessable(_)));
    }

    #[test]
    fn identical_files_share_fast_hash() {
        let dir = TempDir::new().unwrap();
        let a = write_png(&dir, "a.png", 64, 64);
        let b = dir.path().join("b.png");
        fs::copy(&a, &b).unwrap();

        let store = open_store();
        let row_a = seed(&store, &a);
        let row_b = seed(&store, &b);

        let ex = extractor();
        ex.process(&store, &row_a, &null_sender()).unwrap();
        ex.process(&store, &row_b, &null_sender()).unwrap();

        assert_eq!(
            store.file_by_id(row_a.id).unwrap().fast_hash,
            store.file_by_id(row_b.id).unwrap().fast_hash
        );
    }

    #[test]
    fn strong_hash_is_computed_once() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 32, 32);
        let store = open_store();
        let file = seed(&store, &path);

        let first = ensure_strong_hash(&store, &file).unwrap().unwrap();
        let reloaded = store.file_by_id(file.id).unwrap();
        assert_eq!(reloaded.strong_hash.as_deref(), Some(first.as_slice()));

        // Second call serves the stored value
        let second = ensure_strong_hash(&store, &reloaded).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn strong_hash_of_unreadable_file_is_none() {
        let store = open_store();
        let (id, _) = store
            .reconcile_file(Path::new("/nonexistent/x.jpg"), 10, 1)
            .unwrap();
        let file = store.file_by_id(id).unwrap();
        assert!(ensure_strong_hash(&store, &file).unwrap().is_none());
    }
}
