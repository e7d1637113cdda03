//! # Error Module
//!
//! Error types for the deduplication engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, file names, what went wrong
//! - **Per-file errors are values** - a file that cannot be processed is
//!   recorded and skipped, it never aborts the pipeline
//! - Only configuration, store, and pool failures are fatal to a run

use std::path::PathBuf;
use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Feature extraction error: {0}")]
    Feature(#[from] FeatureError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Errors raised while loading or validating settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed settings document: {0}")]
    Malformed(String),

    #[error("Unknown preset: {name}")]
    UnknownPreset { name: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors raised by the embedded store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Schema migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed and was rolled back: {0}")]
    TransactionFailed(String),

    #[error("Store database at {path} is corrupted or its lock was poisoned. Delete the file and rescan.")]
    Corrupted { path: PathBuf },

    #[error("Row not found: {entity} id {id}")]
    NotFound { entity: &'static str, id: i64 },
}

/// Errors that occur during filesystem scanning
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Root directory not found: {path}")]
    RootNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read entry {path}: {source}")]
    ReadEntry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid include/exclude pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },
}

/// Errors that occur while extracting features from a single file.
///
/// These are recorded per file and aggregated into rescan statistics;
/// the offending file is flagged unprocessable and skipped by grouping.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Unsupported image format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Image is empty or has zero dimensions: {path}")]
    EmptyImage { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Retries exhausted for {path} after {attempts} attempts")]
    RetriesExhausted { path: PathBuf, attempts: u32 },
}

impl FeatureError {
    /// Transient errors are retried a bounded number of times before the
    /// file is treated as unprocessable for the current run.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeatureError::Io { .. })
    }

    /// The file this error was raised for.
    pub fn path(&self) -> &PathBuf {
        match self {
            FeatureError::UnsupportedFormat { path }
            | FeatureError::Decode { path, .. }
            | FeatureError::EmptyImage { path }
            | FeatureError::Io { path, .. }
            | FeatureError::RetriesExhausted { path, .. } => path,
        }
    }
}

/// Errors raised by the worker pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Duplicate task id: {id}")]
    DuplicateTask { id: String },

    #[error("Pool is not accepting work (state: {state})")]
    NotAccepting { state: String },

    #[error("Task {id} panicked: {message}")]
    TaskPanicked { id: String, message: String },

    #[error("Task {id} failed: {message}")]
    TaskFailed { id: String, message: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
