//! # Core Module
//!
//! The detection and grouping pipeline.
//!
//! ## Modules
//! - `scanner` - discovers files and reconciles them with the store
//! - `extractor` - computes content hashes, perceptual hashes, and EXIF
//! - `hasher` - the three 64-bit perceptual hash algorithms
//! - `content` - byte-identity hashes (fast xxh3, strong SHA-256)
//! - `metadata` - EXIF subset extraction
//! - `index` - BK-trees for bounded Hamming-distance lookup
//! - `grouping` - two-tier grouping and original selection
//! - `escalation` - safe-duplicate promotion
//! - `overrides` - manual original overrides and conflict detection
//! - `pipeline` - the rescan coordinator tying it all together

pub mod content;
pub mod escalation;
pub mod extractor;
pub mod grouping;
pub mod hasher;
pub mod index;
pub mod metadata;
pub mod overrides;
pub mod pipeline;
pub mod scanner;

pub use escalation::{EscalationEngine, EscalationReport};
pub use extractor::{ExtractOutcome, FeatureExtractor};
pub use grouping::{GroupingEngine, GroupingReport};
pub use index::{BkTree, PerceptualIndex};
pub use pipeline::{run_pipeline, RescanCoordinator, RescanMode, RescanStats};
pub use scanner::{ImageFormat, PathFilter, Scanner};
