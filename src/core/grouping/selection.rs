//! Deterministic original selection.
//!
//! Every member gets a sort key; the minimum wins. The key orders by:
//! 1. highest pixel area,
//! 2. earliest EXIF capture time (missing sorts last),
//! 3. largest file size,
//! 4. format priority (RAW, TIFF, PNG, JPEG, WEBP, then the rest),
//! 5. path bytes, as the stable tie-break.

use crate::core::scanner::ImageFormat;
use crate::error::StoreError;
use crate::store::{FeatureRow, FileRow, Store};

/// Composite key; derived ordering follows field order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SelectionKey {
    neg_area: i64,
    taken_at_ns: i64,
    neg_size: i64,
    format_ordinal: u8,
    path_bytes: Vec<u8>,
}

/// Missing capture timestamps sort after every real one.
const TAKEN_AT_SENTINEL: i64 = i64::MAX;

pub fn selection_key(file: &FileRow, feature: &FeatureRow) -> SelectionKey {
    SelectionKey {
        neg_area: -(feature.pixel_area() as i64),
        taken_at_ns: feature.taken_at_ns.unwrap_or(TAKEN_AT_SENTINEL),
        neg_size: -(file.size as i64),
        format_ordinal: ImageFormat::from_path(&file.path).priority_ordinal(),
        path_bytes: file.path.as_os_str().as_encoded_bytes().to_vec(),
    }
}

/// Pick the original among (file, feature) pairs. None for an empty set.
pub fn select_original<'a, I>(members: I) -> Option<i64>
where
    I: IntoIterator<Item = (&'a FileRow, &'a FeatureRow)>,
{
    members
        .into_iter()
        .min_by_key(|(file, feature)| selection_key(file, feature))
        .map(|(file, _)| file.id)
}

/// What auto-selection would pick for these members right now. Members
/// without features are ignored; None when nothing is selectable.
pub fn auto_select(store: &Store, member_ids: &[i64]) -> Result<Option<i64>, StoreError> {
    let files = store.files_by_ids(member_ids)?;
    let features = store.features_by_file_ids(member_ids)?;

    let mut best: Option<(SelectionKey, i64)> = None;
    for file in &files {
        if file.is_missing {
            continue;
        }
        let Some(feature) = features.iter().find(|f| f.file_id == file.id) else {
            continue;
        };
        let key = selection_key(file, feature);
        if best.as_ref().map_or(true, |(current, _)| key < *current) {
            best = Some((key, file.id));
        }
    }
    Ok(best.map(|(_, id)| id))
}
