//! # Content Hashing Module
//!
//! Byte-level identity fingerprints, distinct from the perceptual
//! hashes: two files with equal content hashes are copies regardless of
//! what the pixels show.
//!
//! - **fast hash**: 64-bit xxh3, computed for every file during feature
//!   extraction; keys the exact-duplicate buckets together with size.
//! - **strong hash**: 256-bit SHA-256, computed lazily only when the
//!   grouping engine asks for exact-bucket confirmation.
//!
//! Files are memory-mapped; 20-40% faster than buffered reads for large
//! images.

use crate::error::FeatureError;
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

fn map_file(path: &Path) -> Result<Option<Mmap>, FeatureError> {
    let file = File::open(path).map_err(|e| FeatureError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let len = file
        .metadata()
        .map_err(|e| FeatureError::Io {
            path: path.to_path_buf(),
            source: e,
        })?
        .len();
    if len == 0 {
        // Mapping zero bytes is platform-dependent; hash the empty slice
        return Ok(None);
    }

    // Read-only map of a user file the engine never writes
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| FeatureError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Some(mmap))
}

/// 64-bit xxh3 over the file bytes.
pub fn fast_content_hash(path: &Path) -> Result<u64, FeatureError> {
    match map_file(path)? {
        Some(mmap) => Ok(xxh3_64(&mmap)),
        None => Ok(xxh3_64(&[])),
    }
}

/// 256-bit SHA-256 over the file bytes.
pub fn strong_content_hash(path: &Path) -> Result<Vec<u8>, FeatureError> {
    let mut hasher = Sha256::new();
    if let Some(mmap) = map_file(path)? {
        hasher.update(&mmap[..]);
    }
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn identical_content_hashes_identically() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.jpg", b"same bytes");
        let b = write(&dir, "b.jpg", b"same bytes");

        assert_eq!(fast_content_hash(&a).unwrap(), fast_content_hash(&b).unwrap());
        assert_eq!(
            strong_content_hash(&a).unwrap(),
            strong_content_hash(&b).unwrap()
        );
    }

    #[test]
    fn different_content_hashes_differently() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.jpg", b"first");
        let b = write(&dir, "b.jpg", b"second");

        assert_ne!(fast_content_hash(&a).unwrap(), fast_content_hash(&b).unwrap());
        assert_ne!(
            strong_content_hash(&a).unwrap(),
            strong_content_hash(&b).unwrap()
        );
    }

    #[test]
    fn empty_file_is_hashable() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.jpg", b"");

        fast_content_hash(&path).unwrap();
        assert_eq!(strong_content_hash(&path).unwrap().len(), 32);
    }

    #[test]
    fn strong_hash_is_256_bits() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.jpg", b"payload");
        assert_eq!(strong_content_hash(&path).unwrap().len(), 32);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = fast_content_hash(Path::new("/nonexistent/file.jpg"));
        assert!(matches!(result, Err(FeatureError::Io { .. })));
    }
}
