//! # Override Module
//!
//! User decisions about which member is a group's original, layered on
//! the store's manual-override table. Overrides survive delta rescans,
//! are consulted by grouping on every run, and are deactivated
//! automatically when their chosen file disappears.

use crate::core::grouping::auto_select;
use crate::error::StoreError;
use crate::events::{ConflictInfo, Event, EventSender, OverrideEvent};
use crate::store::{MemberRole, OverrideReason, OverrideType, Store};
use tracing::info;

/// Record that `file_id` is the original of `group_id`. The file must be
/// a member of the group; the previous override, if any, is deactivated.
pub fn apply_override(
    store: &Store,
    group_id: i64,
    file_id: i64,
    override_type: OverrideType,
    reason: OverrideReason,
    note: Option<&str>,
) -> Result<(), StoreError> {
    // Validates the group exists as a side effect
    let members = store.members_of(group_id)?;
    if members.is_empty() {
        return Err(StoreError::NotFound {
            entity: "group",
            id: group_id,
        });
    }
    if !members.iter().any(|m| m.file_id == file_id) {
        return Err(StoreError::NotFound {
            entity: "group_member",
            id: file_id,
        });
    }

    let member_ids: Vec<i64> = members.iter().map(|m| m.file_id).collect();
    let auto_pick = auto_select(store, &member_ids)?.unwrap_or(file_id);

    store.put_override(group_id, file_id, auto_pick, override_type, reason, note)?;

    // Reflect the decision immediately rather than waiting for a rescan
    if let Some(current) = members.iter().find(|m| m.role == MemberRole::Original) {
        if current.file_id != file_id {
            store.update_member_role(group_id, current.file_id, MemberRole::Duplicate, None)?;
            store.update_member_role(group_id, file_id, MemberRole::Original, None)?;
        }
    }

    info!(group = group_id, file = file_id, "override applied");
    Ok(())
}

/// Deactivate the active override and restore auto-selection.
pub fn remove_override(store: &Store, group_id: i64) -> Result<bool, StoreError> {
    let cleared = store.clear_override(group_id)?;
    if !cleared {
        return Ok(false);
    }

    let members = store.members_of(group_id)?;
    let member_ids: Vec<i64> = members.iter().map(|m| m.file_id).collect();
    if let Some(auto_pick) = auto_select(store, &member_ids)? {
        if let Some(current) = members.iter().find(|m| m.role == MemberRole::Original) {
            if current.file_id != auto_pick {
                store.update_member_role(group_id, current.file_id, MemberRole::Duplicate, None)?;
                store.update_member_role(group_id, auto_pick, MemberRole::Original, None)?;
            }
        }
    }

    info!(group = group_id, "override removed");
    Ok(true)
}

/// Groups where selection inputs have shifted under an active override:
/// a trial re-selection now picks a file that is neither the user's
/// choice nor the auto pick recorded when the override was made. An
/// override merely disagreeing with auto-selection is the normal state
/// of an override, not a conflict. Overrides whose chosen file is gone
/// are not conflicts either; they are reaped instead.
pub fn detect_conflicts(store: &Store) -> Result<Vec<ConflictInfo>, StoreError> {
    let mut conflicts = Vec::new();

    for row in store.active_overrides()? {
        let chosen = match store.file_by_id(row.chosen_file_id) {
            Ok(file) if !file.is_missing => file,
            Ok(_) | Err(StoreError::NotFound { .. }) => continue,
            Err(other) => return Err(other),
        };

        let members = store.members_of(row.group_id)?;
        if members.is_empty() {
            continue;
        }
        let member_ids: Vec<i64> = members.iter().map(|m| m.file_id).collect();
        let Some(auto_pick) = auto_select(store, &member_ids)? else {
            continue;
        };

        if auto_pick != row.chosen_file_id && auto_pick != row.auto_file_id {
            let auto_file = store.file_by_id(auto_pick)?;
            conflicts.push(ConflictInfo {
                group_id: row.group_id,
                chosen_file_id: row.chosen_file_id,
                chosen_path: chosen.path,
                auto_file_id: auto_pick,
                auto_path: auto_file.path,
            });
        }
    }

    Ok(conflicts)
}

/// Deactivate overrides whose chosen file has been marked missing or
/// deleted outright. Returns the deactivated override ids.
pub fn reap_orphans(store: &Store, events: &EventSender) -> Result<Vec<i64>, StoreError> {
    let mut reaped = Vec::new();

    for row in store.active_overrides()? {
        let gone = match store.file_by_id(row.chosen_file_id) {
            Ok(file) => file.is_missing,
            Err(StoreError::NotFound { .. }) => true,
            Err(other) => return Err(other),
        };
        if gone {
            store.deactivate_override(row.id)?;
            events.send(Event::Override(OverrideEvent::TargetMissing {
                group_id: row.group_id,
                chosen_file_id: row.chosen_file_id,
            }));
            reaped.push(row.id);
        }
    }

    Ok(reaped)
}
