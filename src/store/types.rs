//! Row structs and column enums.
//!
//! Mapping between rows and structs is written by hand; the schema is
//! small and stable. Components outside the store hold ids and these
//! short-lived snapshots, never live references into the database.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A discovered image file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub id: i64,
    pub path: PathBuf,
    pub size: u64,
    /// Last-modified time, nanoseconds since the Unix epoch
    pub mtime_ns: i64,
    /// 64-bit xxh3 over the file bytes, if computed
    pub fast_hash: Option<u64>,
    /// 256-bit SHA-256 over the file bytes, computed lazily
    pub strong_hash: Option<Vec<u8>>,
    pub is_missing: bool,
    pub missing_since_ns: Option<i64>,
    pub is_unprocessable: bool,
    pub needs_features: bool,
    pub discovered_at_ns: i64,
}

/// Derived fingerprints of a file. Exists iff the file was successfully
/// processed and its size/mtime have not changed since.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub file_id: i64,
    pub phash: Option<u64>,
    pub dhash: Option<u64>,
    pub ahash: Option<u64>,
    pub width: u32,
    pub height: u32,
    /// EXIF capture timestamp, nanoseconds since the Unix epoch
    pub taken_at_ns: Option<i64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub orientation: Option<u16>,
    pub generated_at_ns: i64,
}

impl FeatureRow {
    /// Pixel area used by dimension filtering and original selection.
    pub fn pixel_area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Duplicate-group tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Exact,
    Near,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Exact => "exact",
            Tier::Near => "near",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Tier::Exact),
            "near" => Some(Tier::Near),
            _ => None,
        }
    }
}

/// Role of a file within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Original,
    Duplicate,
    SafeDuplicate,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Original => "original",
            MemberRole::Duplicate => "duplicate",
            MemberRole::SafeDuplicate => "safe_duplicate",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "original" => Some(MemberRole::Original),
            "duplicate" => Some(MemberRole::Duplicate),
            "safe_duplicate" => Some(MemberRole::SafeDuplicate),
            _ => None,
        }
    }
}

/// One equivalence class of duplicate files.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub id: i64,
    pub tier: Tier,
    pub confidence: f64,
    pub created_at_ns: i64,
    pub updated_at_ns: i64,
}

/// Participation of a file in a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMemberRow {
    pub group_id: i64,
    pub file_id: i64,
    pub role: MemberRole,
    /// Similarity to the group original in [0, 1]; 1.0 for the original
    pub similarity: f64,
    pub note: Option<String>,
}

/// Scope of a manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    SingleGroup,
    DefaultRule,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::SingleGroup => "single_group",
            OverrideType::DefaultRule => "default_rule",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "single_group" => Some(OverrideType::SingleGroup),
            "default_rule" => Some(OverrideType::DefaultRule),
            _ => None,
        }
    }
}

/// Why the user overrode auto-selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    UserPreference,
    QualityBetter,
    FormatPreference,
    ManualSelection,
    AlgorithmError,
}

impl OverrideReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideReason::UserPreference => "user_preference",
            OverrideReason::QualityBetter => "quality_better",
            OverrideReason::FormatPreference => "format_preference",
            OverrideReason::ManualSelection => "manual_selection",
            OverrideReason::AlgorithmError => "algorithm_error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "user_preference" => Some(OverrideReason::UserPreference),
            "quality_better" => Some(OverrideReason::QualityBetter),
            "format_preference" => Some(OverrideReason::FormatPreference),
            "manual_selection" => Some(OverrideReason::ManualSelection),
            "algorithm_error" => Some(OverrideReason::AlgorithmError),
            _ => None,
        }
    }
}

/// A user decision fixing a group's original.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRow {
    pub id: i64,
    pub group_id: i64,
    pub chosen_file_id: i64,
    /// What auto-selection picked at the time the override was recorded
    pub auto_file_id: i64,
    pub override_type: OverrideType,
    pub reason: OverrideReason,
    pub created_at_ns: i64,
    pub note: Option<String>,
    pub is_active: bool,
}

/// Aggregate row counts and feature coverage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreStats {
    pub files: usize,
    /// Files neither missing nor unprocessable
    pub live_files: usize,
    pub features: usize,
    pub groups: usize,
    pub members: usize,
    pub active_overrides: usize,
}

impl StoreStats {
    /// Fraction of live files that have a feature row, in [0, 1].
    /// 1.0 for an empty store.
    pub fn feature_coverage(&self) -> f64 {
        if self.live_files == 0 {
            1.0
        } else {
            self.features as f64 / self.live_files as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_strings_round_trip() {
        for tier in [Tier::Exact, Tier::Near] {
            assert_eq!(Tier::from_str(tier.as_str()), Some(tier));
        }
        assert_eq!(Tier::from_str("fuzzy"), None);
    }

    #[test]
    fn role_strings_round_trip() {
        for role in [
            MemberRole::Original,
            MemberRole::Duplicate,
            MemberRole::SafeDuplicate,
        ] {
            assert_eq!(MemberRole::from_str(role.as_str()), Some(role));
        }
    }

    #[test]
    fn override_enums_round_trip() {
        for kind in [OverrideType::SingleGroup, OverrideType::DefaultRule] {
            assert_eq!(OverrideType::from_str(kind.as_str()), Some(kind));
        }
        for reason in [
            OverrideReason::UserPreference,
            OverrideReason::QualityBetter,
            OverrideReason::FormatPreference,
            OverrideReason::ManualSelection,
            OverrideReason::AlgorithmError,
        ] {
            assert_eq!(OverrideReason::from_str(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn coverage_of_empty_store_is_full() {
        let stats = StoreStats {
            files: 0,
            live_files: 0,
            features: 0,
            groups: 0,
            members: 0,
            active_overrides: 0,
        };
        assert_eq!(stats.feature_coverage(), 1.0);
    }

    #[test]
    fn coverage_reflects_feature_ratio() {
        let stats = StoreStats {
            files: 10,
            live_files: 8,
            features: 4,
            groups: 0,
            members: 0,
            active_overrides: 0,
        };
        assert!((stats.feature_coverage() - 0.5).abs() < f64::EPSILON);
    }
}
