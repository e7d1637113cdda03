//! # Scanner Module
//!
//! Walks the configured roots, filters entries through the ordered
//! include/exclude pattern lists, and reconciles what it finds against
//! the store: new files are inserted, changed files have their features
//! invalidated, vanished files are soft-deleted.
//!
//! The scanner only ever reads the filesystem; every mutation goes to
//! the store.

mod filter;
mod walker;

pub use filter::PathFilter;
pub use walker::{detect_missing, RootScan, Scanner};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Image format classified from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Raw,
    Tiff,
    Png,
    Jpeg,
    WebP,
    Heic,
    Gif,
    Bmp,
    Unknown,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "cr2" | "cr3" | "nef" | "arw" | "dng" | "orf" | "rw2" | "raf" => ImageFormat::Raw,
            "tif" | "tiff" => ImageFormat::Tiff,
            "png" => ImageFormat::Png,
            "jpg" | "jpeg" => ImageFormat::Jpeg,
            "webp" => ImageFormat::WebP,
            "heic" | "heif" => ImageFormat::Heic,
            "gif" => ImageFormat::Gif,
            "bmp" => ImageFormat::Bmp,
            _ => ImageFormat::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(ImageFormat::from_extension)
            .unwrap_or(ImageFormat::Unknown)
    }

    /// Ordinal used by original selection: smaller wins ties. RAW beats
    /// TIFF beats PNG beats JPEG beats WEBP beats everything else.
    pub fn priority_ordinal(&self) -> u8 {
        match self {
            ImageFormat::Raw => 1,
            ImageFormat::Tiff => 2,
            ImageFormat::Png => 3,
            ImageFormat::Jpeg => 4,
            ImageFormat::WebP => 5,
            _ => 6,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ImageFormat::Raw)
    }

    pub fn is_tiff(&self) -> bool {
        matches!(self, ImageFormat::Tiff)
    }
}
