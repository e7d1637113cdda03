//! # Escalation Engine Module
//!
//! Promotes `duplicate` members to `safe_duplicate` when three
//! predicates all hold against the group's original:
//!
//! - **size**: byte-exact file size equality;
//! - **time**: both EXIF capture timestamps present and within the
//!   configured tolerance; one missing fails; both missing passes only
//!   outside strict-EXIF mode;
//! - **camera**: equal camera model strings, vacuously true when the
//!   check is disabled or both models are missing; one missing fails.
//!
//! Promotion is idempotent; members already in the safe tier are left
//! alone. Downgrades happen only through group recomputation.

use crate::error::StoreError;
use crate::events::{Event, EventSender, GroupEvent};
use crate::settings::Settings;
use crate::store::{FeatureRow, FileRow, MemberRole, Store};
use tracing::debug;

/// Tally returned by one escalation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub promoted: usize,
    pub examined: usize,
}

/// Per-run escalation engine, configured from the settings snapshot.
pub struct EscalationEngine {
    tolerance_ns: i64,
    camera_check: bool,
    strict_exif: bool,
}

impl EscalationEngine {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tolerance_ns: (settings.escalation.datetime_tolerance_seconds * 1e9) as i64,
            camera_check: settings.escalation.enable_camera_model_check,
            strict_exif: settings.grouping.strict_mode_require_exif_datetime_match,
        }
    }

    /// Walk every group and promote qualifying duplicates.
    pub fn run(&self, store: &Store, events: &EventSender) -> Result<EscalationReport, StoreError> {
        let mut report = EscalationReport::default();

        for (group, members) in store.groups_with_members()? {
            let Some(original_member) = members.iter().find(|m| m.role == MemberRole::Original)
            else {
                continue;
            };
            let original_file = store.file_by_id(original_member.file_id)?;
            let original_feature = store.feature_by_file_id(original_member.file_id)?;

            for member in &members {
                if member.role != MemberRole::Duplicate {
                    continue;
                }
                report.examined += 1;

                let file = store.file_by_id(member.file_id)?;
                let feature = store.feature_by_file_id(member.file_id)?;

                let size = size_match(&file, &original_file);
                let time = self.time_match(feature.as_ref(), original_feature.as_ref());
                let camera = self.camera_match(feature.as_ref(), original_feature.as_ref());
                if !(size && time && camera) {
                    continue;
                }

                let note = escalation_note(self.camera_check);
                store.update_member_role(
                    group.id,
                    member.file_id,
                    MemberRole::SafeDuplicate,
                    Some(&note),
                )?;
                report.promoted += 1;
                debug!(group = group.id, file = member.file_id, "member escalated");
                events.send(Event::Group(GroupEvent::MemberEscalated {
                    group_id: group.id,
                    file_id: member.file_id,
                }));
            }
        }

        Ok(report)
    }

    fn time_match(&self, a: Option<&FeatureRow>, b: Option<&FeatureRow>) -> bool {
        let ta = a.and_then(|f| f.taken_at_ns);
        let tb = b.and_then(|f| f.taken_at_ns);
        match (ta, tb) {
            (Some(ta), Some(tb)) => (ta - tb).abs() <= self.tolerance_ns,
            (None, None) => !self.strict_exif,
            _ => false,
        }
    }

    fn camera_match(&self, a: Option<&FeatureRow>, b: Option<&FeatureRow>) -> bool {
        if !self.camera_check {
            return true;
        }
        let ma = a.and_then(|f| f.camera_model.as_deref());
        let mb = b.and_then(|f| f.camera_model.as_deref());
        match (ma, mb) {
            (Some(ma), Some(mb)) => ma == mb,
            (None, None) => true,
            _ => false,
        }
    }
}

fn size_match(a: &FileRow, b: &FileRow) -> bool {
    a.size == b.size
}

fn escalation_note(camera_checked: bool) -> String {
    if camera_checked {
        "size, capture time, and camera model match the original".to_string()
    } else {
        "size and capture time match the original".to_string()
    }
}
