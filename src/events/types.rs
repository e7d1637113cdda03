//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the deduplication engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Scanner reconciliation events
    Scan(ScanEvent),
    /// Feature extraction events
    Feature(FeatureEvent),
    /// Grouping and escalation events
    Group(GroupEvent),
    /// Worker pool state transitions
    Pool(PoolEvent),
    /// Manual override lifecycle events
    Override(OverrideEvent),
    /// Pipeline-level events
    Rescan(RescanEvent),
}

/// Events during filesystem reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Scanning has started over the given roots
    Started { roots: Vec<PathBuf> },
    /// A file was seen for the first time
    FileDiscovered { path: PathBuf },
    /// A known file's size or mtime changed; its features were invalidated
    FileChanged { path: PathBuf },
    /// A known file was not found on disk and was marked missing
    FileMissing { path: PathBuf },
    /// An entry could not be read; scanning continues
    Error { path: PathBuf, message: String },
    /// Scanning completed
    Completed {
        discovered: usize,
        changed: usize,
        missing: usize,
        unchanged: usize,
    },
}

/// Events during feature extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeatureEvent {
    /// Extraction has started
    Started { total_files: usize },
    /// Features were computed and persisted for a file
    Computed { path: PathBuf },
    /// A file could not be processed and was flagged unprocessable
    Unprocessable { path: PathBuf, reason: String },
    /// Extraction completed
    Completed { computed: usize, unprocessable: usize },
}

/// Events during grouping and escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupEvent {
    /// Grouping has started
    Started { candidate_files: usize },
    /// A group was written to the store
    GroupPersisted {
        group_id: i64,
        tier: String,
        member_count: usize,
    },
    /// A duplicate member was promoted to the safe tier
    MemberEscalated { group_id: i64, file_id: i64 },
    /// Grouping completed
    Completed { groups: usize, duplicates: usize },
}

/// Worker pool state transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PoolEvent {
    /// The pool moved from one state to another
    StateChanged { from: String, to: String },
}

/// Manual override lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OverrideEvent {
    /// Auto-selection now disagrees with an active override
    Conflict(ConflictInfo),
    /// An active override's chosen file vanished; the override was deactivated
    TargetMissing { group_id: i64, chosen_file_id: i64 },
}

/// Details of a disagreement between an active override and auto-selection.
///
/// Not an error: the UI presents this to the user for resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub group_id: i64,
    /// File the user chose as original
    pub chosen_file_id: i64,
    pub chosen_path: PathBuf,
    /// File auto-selection would pick right now
    pub auto_file_id: i64,
    pub auto_path: PathBuf,
}

/// Pipeline-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RescanEvent {
    /// A pipeline run started
    Started { run_id: String, mode: String },
    /// Rate-limited progress update (at most one per 100 ms)
    Progress(RescanProgress),
    /// A pipeline run completed
    Completed { run_id: String },
}

/// Progress counters for a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RescanProgress {
    pub files_scanned: usize,
    pub features_computed: usize,
    pub features_reused: usize,
    pub groups_created: usize,
}

impl RescanProgress {
    /// Fraction of feature work satisfied from the store rather than
    /// recomputed. 1.0 when nothing had to be recomputed.
    pub fn efficiency(&self) -> f64 {
        let total = self.features_reused + self.features_computed;
        if total == 0 {
            1.0
        } else {
            self.features_reused as f64 / total as f64
        }
    }
}
