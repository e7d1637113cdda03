//! # Metadata Module
//!
//! Extracts the EXIF subset the engine cares about: capture timestamp
//! (with sub-second resolution where the camera wrote it), camera make
//! and model, orientation, and native dimensions.
//!
//! EXIF is best-effort: a file without readable EXIF yields an empty
//! subset, never an error.

use chrono::NaiveDateTime;
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// The EXIF subset persisted on a feature row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifSummary {
    /// Capture time as nanoseconds since the Unix epoch, naive UTC
    pub taken_at_ns: Option<i64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    /// EXIF orientation tag, 1-8 where 1 is upright
    pub orientation: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ExifSummary {
    pub fn has_data(&self) -> bool {
        self.taken_at_ns.is_some()
            || self.camera_make.is_some()
            || self.camera_model.is_some()
            || self.orientation.is_some()
    }
}

/// Read the EXIF subset from a file. Missing or unreadable EXIF yields
/// the empty summary.
pub fn read_exif(path: &Path) -> ExifSummary {
    let mut summary = ExifSummary::default();

    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return summary,
    };
    let mut reader = BufReader::new(&file);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(_) => return summary,
    };

    if let Some(field) = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
        if let Some(datetime) = ascii_value(&field.value) {
            let subsec = exif
                .get_field(Tag::SubSecTimeOriginal, In::PRIMARY)
                .and_then(|f| ascii_value(&f.value));
            summary.taken_at_ns = parse_exif_datetime(&datetime, subsec.as_deref());
        }
    }

    if let Some(field) = exif.get_field(Tag::Make, In::PRIMARY) {
        summary.camera_make = ascii_value(&field.value);
    }
    if let Some(field) = exif.get_field(Tag::Model, In::PRIMARY) {
        summary.camera_model = ascii_value(&field.value);
    }

    if let Some(field) = exif.get_field(Tag::Orientation, In::PRIMARY) {
        if let Value::Short(ref values) = field.value {
            summary.orientation = values.first().copied();
        }
    }

    if let Some(field) = exif.get_field(Tag::PixelXDimension, In::PRIMARY) {
        summary.width = u32_value(&field.value);
    }
    if let Some(field) = exif.get_field(Tag::PixelYDimension, In::PRIMARY) {
        summary.height = u32_value(&field.value);
    }

    summary
}

/// Parse "YYYY:MM:DD HH:MM:SS" plus an optional sub-second digit string
/// into epoch nanoseconds.
fn parse_exif_datetime(datetime: &str, subsec: Option<&str>) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(datetime.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    let base_ns = naive.and_utc().timestamp_nanos_opt()?;

    let frac_ns = subsec
        .map(|digits| {
            let digits: String = digits.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return 0i64;
            }
            // "4" means 0.4s, "123" means 0.123s
            let value: i64 = digits.parse().unwrap_or(0);
            let scale = 10i64.pow(9u32.saturating_sub(digits.len() as u32));
            value * scale
        })
        .unwrap_or(0);

    Some(base_ns + frac_ns)
}

fn ascii_value(value: &Value) -> Option<String> {
    if let Value::Ascii(ref vec) = value {
        if let Some(bytes) = vec.first() {
            if let Ok(s) = std::str::from_utf8(bytes) {
                let trimmed = s.trim_end_matches('\0').trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

fn u32_value(value: &Value) -> Option<u32> {
    match value {
        Value::Long(vec) => vec.first().copied(),
        Value::Short(vec) => vec.first().map(|v| *v as u32),
        _ => None,
    }
}
