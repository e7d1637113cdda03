//! # Settings Module
//!
//! Typed configuration snapshot consumed by every component.
//!
//! A [`Settings`] value is immutable for the duration of a pipeline run.
//! It is produced from a persisted JSON document plus one of four
//! performance presets; unknown keys in the document are rejected at load
//! time rather than silently ignored.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Performance presets. Switching a preset replaces every preset-owned
/// field atomically; `Custom` leaves the current values untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    UltraLite,
    Balanced,
    Accurate,
    Custom,
}

impl Preset {
    pub fn name(&self) -> &'static str {
        match self {
            Preset::UltraLite => "ultra-lite",
            Preset::Balanced => "balanced",
            Preset::Accurate => "accurate",
            Preset::Custom => "custom",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "ultra-lite" => Ok(Preset::UltraLite),
            "balanced" => Ok(Preset::Balanced),
            "accurate" => Ok(Preset::Accurate),
            "custom" => Ok(Preset::Custom),
            other => Err(ConfigError::UnknownPreset {
                name: other.to_string(),
            }),
        }
    }
}

/// Worker pool knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConcurrencySettings {
    /// Maximum number of workers executing at once
    pub thread_cap: usize,
    /// Minimum spacing between task starts per I/O category is
    /// `1 / io_throttle_ops_per_sec`; 0 disables throttling
    pub io_throttle_ops_per_sec: f64,
    pub back_off_enabled: bool,
    /// Interaction events per window that trigger back-off
    pub interaction_threshold_events_per_sec: u32,
    pub interaction_window_seconds: f64,
    pub back_off_duration_seconds: f64,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            thread_cap: 4,
            io_throttle_ops_per_sec: 0.5,
            back_off_enabled: true,
            interaction_threshold_events_per_sec: 3,
            interaction_window_seconds: 1.0,
            back_off_duration_seconds: 2.0,
        }
    }
}

/// Unit-of-work sizes for pool submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BatchSettings {
    pub batch_scanning: usize,
    pub batch_hashing: usize,
    pub batch_thumbnails: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_scanning: 100,
            batch_hashing: 50,
            batch_thumbnails: 25,
        }
    }
}

/// Hamming-distance thresholds per perceptual hash kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NearDupeThresholds {
    pub phash: u32,
    pub dhash: u32,
    pub ahash: u32,
}

impl Default for NearDupeThresholds {
    fn default() -> Self {
        Self {
            phash: 8,
            dhash: 8,
            ahash: 10,
        }
    }
}

/// Hashing and decoding knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HashingSettings {
    pub near_dupe_thresholds: NearDupeThresholds,
    /// Confirm exact buckets with a 256-bit content hash before grouping
    pub enable_strong_hash_confirmation: bool,
    /// Recognized and carried for the external feature-match fallback;
    /// the core itself never consumes it
    pub enable_feature_match_fallback: bool,
    /// Images are decoded at no more than this side length for hashing
    pub max_decode_edge: u32,
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            near_dupe_thresholds: NearDupeThresholds::default(),
            enable_strong_hash_confirmation: true,
            enable_feature_match_fallback: false,
            max_decode_edge: 256,
        }
    }
}

/// Grouping filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GroupingSettings {
    /// Maximum relative pixel-area deviation for near candidates
    pub dimension_tolerance_fraction: f64,
    /// Require equal EXIF capture timestamps for near candidates
    pub strict_mode_require_exif_datetime_match: bool,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self {
            dimension_tolerance_fraction: 0.10,
            strict_mode_require_exif_datetime_match: false,
        }
    }
}

/// Safe-duplicate promotion criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EscalationSettings {
    pub datetime_tolerance_seconds: f64,
    pub enable_camera_model_check: bool,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            datetime_tolerance_seconds: 2.0,
            enable_camera_model_check: true,
        }
    }
}

/// Which formats the extractor refuses up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FormatPolicy {
    pub skip_raw_formats: bool,
    pub skip_tiff_formats: bool,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            skip_raw_formats: true,
            skip_tiff_formats: false,
        }
    }
}

/// Immutable configuration snapshot for one pipeline run.
///
/// Defaults correspond to the Balanced preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub preset: Preset,
    pub concurrency: ConcurrencySettings,
    pub batches: BatchSettings,
    pub hashing: HashingSettings,
    pub grouping: GroupingSettings,
    pub escalation: EscalationSettings,
    pub formats: FormatPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preset: Preset::Balanced,
            concurrency: ConcurrencySettings::default(),
            batches: BatchSettings::default(),
            hashing: HashingSettings::default(),
            grouping: GroupingSettings::default(),
            escalation: EscalationSettings::default(),
            formats: FormatPolicy::default(),
        }
    }
}

impl Settings {
    /// Build a snapshot for the given preset from defaults.
    pub fn for_preset(preset: Preset) -> Self {
        let mut settings = Settings::default();
        settings.apply_preset(preset);
        settings
    }

    /// Parse a persisted JSON document. Unknown keys and malformed values
    /// are rejected; the resulting snapshot is validated.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            serde_json::from_str(document).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Replace every preset-owned field with the preset's values.
    /// `Custom` records the preset and changes nothing else.
    pub fn apply_preset(&mut self, preset: Preset) {
        self.preset = preset;
        match preset {
            Preset::UltraLite => {
                self.concurrency.thread_cap = 2;
                self.concurrency.io_throttle_ops_per_sec = 1.0;
                self.hashing.near_dupe_thresholds.phash = 6;
                self.hashing.enable_feature_match_fallback = false;
                self.hashing.max_decode_edge = 128;
                self.formats.skip_raw_formats = true;
                self.formats.skip_tiff_formats = true;
            }
            Preset::Balanced => {
                self.concurrency.thread_cap = 4;
                self.concurrency.io_throttle_ops_per_sec = 0.5;
                self.hashing.near_dupe_thresholds.phash = 8;
                self.hashing.enable_feature_match_fallback = false;
                self.hashing.max_decode_edge = 256;
                self.formats.skip_raw_formats = true;
                self.formats.skip_tiff_formats = false;
            }
            Preset::Accurate => {
                self.concurrency.thread_cap = 8;
                self.concurrency.io_throttle_ops_per_sec = 0.0;
                self.hashing.near_dupe_thresholds.phash = 8;
                self.hashing.enable_feature_match_fallback = true;
                self.hashing.max_decode_edge = 512;
                self.formats.skip_raw_formats = false;
                self.formats.skip_tiff_formats = false;
            }
            Preset::Custom => {}
        }
    }

    /// Check numeric ranges. Called by [`Settings::from_json`] and again
    /// at pipeline start so hand-constructed snapshots are covered too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.thread_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.thread_cap",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.concurrency.io_throttle_ops_per_sec < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.io_throttle_ops_per_sec",
                reason: "must not be negative".to_string(),
            });
        }
        if self.concurrency.interaction_window_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.interaction_window_seconds",
                reason: "must be positive".to_string(),
            });
        }
        if self.concurrency.back_off_duration_seconds < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency.back_off_duration_seconds",
                reason: "must not be negative".to_string(),
            });
        }
        for (field, value) in [
            ("batches.batch_scanning", self.batches.batch_scanning),
            ("batches.batch_hashing", self.batches.batch_hashing),
            ("batches.batch_thumbnails", self.batches.batch_thumbnails),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        let thresholds = &self.hashing.near_dupe_thresholds;
        for (field, value) in [
            ("hashing.near_dupe_thresholds.phash", thresholds.phash),
            ("hashing.near_dupe_thresholds.dhash", thresholds.dhash),
            ("hashing.near_dupe_thresholds.ahash", thresholds.ahash),
        ] {
            if value > 64 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{} exceeds the 64-bit hash width", value),
                });
            }
        }
        if self.hashing.max_decode_edge == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hashing.max_decode_edge",
                reason: "must be at least 1".to_string(),
            });
        }
        let tolerance = self.grouping.dimension_tolerance_fraction;
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(ConfigError::InvalidValue {
                field: "grouping.dimension_tolerance_fraction",
                reason: format!("{} is outside [0, 1]", tolerance),
            });
        }
        if self.escalation.datetime_tolerance_seconds < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "escalation.datetime_tolerance_seconds",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_balanced_preset() {
        assert_eq!(Settings::default(), Settings::for_preset(Preset::Balanced));
    }

    #[test]
    fn ultra_lite_tightens_phash_threshold() {
        let settings = Settings::for_preset(Preset::UltraLite);
        assert_eq!(settings.hashing.near_dupe_thresholds.phash, 6);
        assert_eq!(settings.concurrency.thread_cap, 2);
        assert!(settings.formats.skip_tiff_formats);
    }

    #[test]
    fn accurate_disables_throttle() {
        let settings = Settings::for_preset(Preset::Accurate);
        assert_eq!(settings.concurrency.io_throttle_ops_per_sec, 0.0);
        assert!(!settings.formats.skip_raw_formats);
    }

    #[test]
    fn custom_preserves_existing_values() {
        let mut settings = Settings::for_preset(Preset::UltraLite);
        settings.apply_preset(Preset::Custom);
        assert_eq!(settings.preset, Preset::Custom);
        assert_eq!(settings.hashing.near_dupe_thresholds.phash, 6);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = Settings::from_json(r#"{"turbo_mode": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let settings =
            Settings::from_json(r#"{"concurrency": {"thread_cap": 6}}"#).unwrap();
        assert_eq!(settings.concurrency.thread_cap, 6);
        assert_eq!(settings.batches.batch_hashing, 50);
    }

    #[test]
    fn zero_thread_cap_is_invalid() {
        let result = Settings::from_json(r#"{"concurrency": {"thread_cap": 0}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field, .. }) if field == "concurrency.thread_cap"
        ));
    }

    #[test]
    fn oversized_threshold_is_invalid() {
        let mut settings = Settings::default();
        settings.hashing.near_dupe_thresholds.ahash = 65;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn preset_names_round_trip() {
        for preset in [
            Preset::UltraLite,
            Preset::Balanced,
            Preset::Accurate,
            Preset::Custom,
        ] {
            assert_eq!(Preset::from_name(preset.name()).unwrap(), preset);
        }
    }

    #[test]
    fn unknown_preset_name_is_rejected() {
        assert!(matches!(
            Preset::from_name("turbo"),
            Err(ConfigError::UnknownPreset { .. })
        ));
    }
}
