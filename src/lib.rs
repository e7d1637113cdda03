//! # Photo Dedupe
//!
//! A local photo deduplication engine: discovers image files under
//! user-specified roots, fingerprints them, groups bit-identical and
//! visually near-identical photos, picks a deterministic original per
//! group, and escalates high-confidence duplicates to a "safe to
//! delete" tier. All state persists in an embedded SQLite store so
//! subsequent runs do only delta work.
//!
//! ## Architecture
//! The crate is a library; UI, CLI, and report layers live elsewhere
//! and consume the API below plus the event channel:
//! - `core` - the detection and grouping pipeline
//! - `store` - the embedded database
//! - `pool` - the shared worker pool (priority, throttle, back-off)
//! - `settings` - typed configuration snapshot with presets
//! - `events` - progress and lifecycle reporting
//! - `error` - error types
//!
//! ## Ground rules
//! - User files are read-only; the engine records roles, it never
//!   moves or deletes photos.
//! - Per-file failures are recorded and skipped; only configuration
//!   and store failures abort a run.

pub mod core;
pub mod error;
pub mod events;
pub mod pool;
pub mod settings;
pub mod store;

pub use crate::core::overrides::{apply_override, detect_conflicts, remove_override};
pub use crate::core::pipeline::{run_pipeline, RescanCoordinator, RescanMode, RescanStats};
pub use error::{EngineError, Result};
pub use events::{channel, null_sender, ConflictInfo, Event, EventReceiver, EventSender};
pub use pool::{PoolConfig, PoolState, Priority, WorkerPool};
pub use settings::{Preset, Settings};
pub use store::{GroupSummary, MemberRole, OverrideReason, OverrideType, Store, Tier};

use error::StoreError;
use std::path::Path;

/// Open (or create) the store database at `path`.
pub fn open_store(path: &Path) -> std::result::Result<Store, StoreError> {
    Store::open(path)
}

/// Apply forward schema migrations. Must run before the first pipeline
/// invocation on a store.
pub fn migrate(store: &Store) -> std::result::Result<(), StoreError> {
    store.migrate()
}

/// Which groups a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFilter {
    All,
    Exact,
    Near,
    /// Groups holding at least one safe duplicate
    SafeOnly,
    /// Groups whose active override disagrees with auto-selection
    WithConflicts,
}

/// List duplicate groups with resolved member paths.
pub fn list_groups(
    store: &Store,
    filter: GroupFilter,
) -> std::result::Result<Vec<GroupSummary>, StoreError> {
    match filter {
        GroupFilter::All => store.list_group_summaries(None, false),
        GroupFilter::Exact => store.list_group_summaries(Some(Tier::Exact), false),
        GroupFilter::Near => store.list_group_summaries(Some(Tier::Near), false),
        GroupFilter::SafeOnly => store.list_group_summaries(None, true),
        GroupFilter::WithConflicts => {
            let ids: Vec<i64> = detect_conflicts(store)?
                .into_iter()
                .map(|conflict| conflict.group_id)
                .collect();
            store.group_summaries_by_ids(&ids)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_store as open_test_store;
    use crate::store::{FeatureRow, NewMember};

    fn seed_pair(store: &Store, tier: Tier, prefix: &str) -> i64 {
        let (a, _) = store
            .reconcile_file(Path::new(&format!("/{}/a.jpg", prefix)), 10, 1)
            .unwrap();
        let (b, _) = store
            .reconcile_file(Path::new(&format!("/{}/b.jpg", prefix)), 10, 1)
            .unwrap();
        for id in [a, b] {
            store
                .put_feature(&FeatureRow {
                    file_id: id,
                    phash: Some(1),
                    dhash: Some(1),
                    ahash: Some(1),
                    width: 10,
                    height: 10,
                    taken_at_ns: None,
                    camera_make: None,
                    camera_model: None,
                    orientation: None,
                    generated_at_ns: 1,
                })
                .unwrap();
        }
        store
            .persist_group(
                tier,
                1.0,
                &[
                    NewMember {
                        file_id: a,
                        role: MemberRole::Original,
                        similarity: 1.0,
                        note: None,
                    },
                    NewMember {
                        file_id: b,
                        role: MemberRole::Duplicate,
                        similarity: 1.0,
                        note: None,
                    },
                ],
                None,
                None,
            )
            .unwrap()
    }

    #[test]
    fn list_groups_filters_by_tier() {
        let store = open_test_store();
        let exact = seed_pair(&store, Tier::Exact, "e");
        let near = seed_pair(&store, Tier::Near, "n");

        assert_eq!(list_groups(&store, GroupFilter::All).unwrap().len(), 2);

        let exact_only = list_groups(&store, GroupFilter::Exact).unwrap();
        assert_eq!(exact_only.len(), 1);
        assert_eq!(exact_only[0].id, exact);

        let near_only = list_groups(&store, GroupFilter::Near).unwrap();
        assert_eq!(near_only.len(), 1);
        assert_eq!(near_only[0].id, near);
    }

    #[test]
    fn safe_only_requires_an_escalated_member() {
        let store = open_test_store();
        let group = seed_pair(&store, Tier::Exact, "s");
        assert!(list_groups(&store, GroupFilter::SafeOnly).unwrap().is_empty());

        let duplicate = store
            .members_of(group)
            .unwrap()
            .into_iter()
            .find(|m| m.role == MemberRole::Duplicate)
            .unwrap();
        store
            .update_member_role(group, duplicate.file_id, MemberRole::SafeDuplicate, None)
            .unwrap();

        assert_eq!(list_groups(&store, GroupFilter::SafeOnly).unwrap().len(), 1);
    }

    #[test]
    fn with_conflicts_surfaces_shifted_selections() {
        let store = open_test_store();
        let group = seed_pair(&store, Tier::Near, "c");

        let duplicate = store
            .members_of(group)
            .unwrap()
            .into_iter()
            .find(|m| m.role == MemberRole::Duplicate)
            .unwrap();
        apply_override(
            &store,
            group,
            duplicate.file_id,
            OverrideType::SingleGroup,
            OverrideReason::UserPreference,
            None,
        )
        .unwrap();
        // Nothing changed since the decision: no conflict yet
        assert!(list_groups(&store, GroupFilter::WithConflicts)
            .unwrap()
            .is_empty());

        // A third, higher-resolution member joins the group and takes
        // over auto-selection
        let (late, _) = store.reconcile_file(Path::new("/c/late.jpg"), 10, 1).unwrap();
        store
            .put_feature(&FeatureRow {
                file_id: late,
                phash: Some(1),
                dhash: Some(1),
                ahash: Some(1),
                width: 100,
                height: 100,
                taken_at_ns: None,
                camera_make: None,
                camera_model: None,
                orientation: None,
                generated_at_ns: 1,
            })
            .unwrap();
        let members = store.members_of(group).unwrap();
        let mut new_members: Vec<NewMember> = members
            .iter()
            .map(|m| NewMember {
                file_id: m.file_id,
                role: m.role,
                similarity: m.similarity,
                note: None,
            })
            .collect();
        new_members.push(NewMember {
            file_id: late,
            role: MemberRole::Duplicate,
            similarity: 0.9,
            note: None,
        });
        store
            .persist_group(Tier::Near, 1.0, &new_members, Some(group), None)
            .unwrap();

        let conflicted = list_groups(&store, GroupFilter::WithConflicts).unwrap();
        assert_eq!(conflicted.len(), 1);
        assert_eq!(conflicted[0].id, group);
    }
}
