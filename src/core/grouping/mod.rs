//! # Grouping Engine Module
//!
//! Two-tier grouping over files whose features are current.
//!
//! **Tier 1 (exact)** buckets by (size, fast hash); with strong-hash
//! confirmation enabled each bucket is subdivided by SHA-256 before a
//! group is emitted at confidence 1.0, otherwise the fast-hash bucket is
//! accepted at 0.95.
//!
//! **Tier 2 (near)** walks the remaining files in stable id order,
//! queries the pHash BK-tree within the preset threshold, and filters
//! candidates by pixel-area tolerance and (in strict mode) equal EXIF
//! capture timestamps.
//!
//! Groups are upserted with stable ids: a recomputed group reuses the id
//! of the stored group it overlaps, and stored groups that were not
//! reproduced are deleted.

pub mod selection;

pub use selection::{auto_select, select_original, selection_key};

use crate::core::extractor::ensure_strong_hash;
use crate::core::hasher::HashKind;
use crate::core::index::PerceptualIndex;
use crate::error::StoreError;
use crate::events::{Event, EventSender, GroupEvent, OverrideEvent};
use crate::settings::Settings;
use crate::store::{FeatureRow, FileRow, MemberRole, NewMember, Store, Tier};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Tally returned by one grouping pass.
#[derive(Debug, Default)]
pub struct GroupingReport {
    pub exact_groups: usize,
    pub near_groups: usize,
    /// Members with a role other than original
    pub duplicates: usize,
    /// Overrides whose chosen file vanished and were deactivated
    pub overrides_dropped: usize,
    /// Ids of every group persisted this pass
    pub group_ids: Vec<i64>,
}

struct ComputedGroup {
    tier: Tier,
    confidence: f64,
    member_ids: Vec<i64>,
    /// Minimum pHash distance seen while forming a near group
    min_distance: u32,
}

/// Per-run grouping engine, configured from the settings snapshot.
pub struct GroupingEngine {
    phash_threshold: u32,
    strong_confirmation: bool,
    dimension_tolerance: f64,
    strict_exif: bool,
}

impl GroupingEngine {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            phash_threshold: settings.hashing.near_dupe_thresholds.phash,
            strong_confirmation: settings.hashing.enable_strong_hash_confirmation,
            dimension_tolerance: settings.grouping.dimension_tolerance_fraction,
            strict_exif: settings.grouping.strict_mode_require_exif_datetime_match,
        }
    }

    /// Run both tiers and persist the result. Files without features are
    /// skipped this run and revisited on the next.
    pub fn run(
        &self,
        store: &Store,
        index: &PerceptualIndex,
        events: &EventSender,
    ) -> Result<GroupingReport, StoreError> {
        let files = store.groupable_files()?;
        let ids: Vec<i64> = files.iter().map(|f| f.id).collect();
        let features: HashMap<i64, FeatureRow> = store
            .features_by_file_ids(&ids)?
            .into_iter()
            .map(|f| (f.file_id, f))
            .collect();
        let by_id: HashMap<i64, &FileRow> = files.iter().map(|f| (f.id, f)).collect();

        let candidates: Vec<&FileRow> = files
            .iter()
            .filter(|f| features.contains_key(&f.id))
            .collect();
        events.send(Event::Group(GroupEvent::Started {
            candidate_files: candidates.len(),
        }));

        let mut absorbed: HashSet<i64> = HashSet::new();
        let mut computed: Vec<ComputedGroup> = Vec::new();

        self.exact_tier(store, &candidates, &mut absorbed, &mut computed)?;
        self.near_tier(index, &candidates, &features, &mut absorbed, &mut computed);

        let report = self.persist(store, computed, &by_id, &features, events)?;
        info!(
            exact = report.exact_groups,
            near = report.near_groups,
            duplicates = report.duplicates,
            "grouping complete"
        );
        events.send(Event::Group(GroupEvent::Completed {
            groups: report.group_ids.len(),
            duplicates: report.duplicates,
        }));
        Ok(report)
    }

    /// Tier 1: (size, fast hash) buckets, optionally confirmed by the
    /// strong hash.
    fn exact_tier(
        &self,
        store: &Store,
        candidates: &[&FileRow],
        absorbed: &mut HashSet<i64>,
        computed: &mut Vec<ComputedGroup>,
    ) -> Result<(), StoreError> {
        let mut buckets: HashMap<(u64, u64), Vec<&FileRow>> = HashMap::new();
        for &file in candidates {
            if let Some(fast_hash) = file.fast_hash {
                buckets.entry((file.size, fast_hash)).or_default().push(file);
            }
        }

        // Deterministic processing order: by smallest member id
        let mut buckets: Vec<Vec<&FileRow>> =
            buckets.into_values().filter(|b| b.len() >= 2).collect();
        for bucket in &mut buckets {
            bucket.sort_by_key(|f| f.id);
        }
        buckets.sort_by_key(|b| b[0].id);

        for bucket in buckets {
            if self.strong_confirmation {
                let mut confirmed: HashMap<Vec<u8>, Vec<i64>> = HashMap::new();
                for &file in &bucket {
                    // A file whose bytes cannot be re-read gets no
                    // confirmation and stays out of the group
                    if let Some(hash) = ensure_strong_hash(store, file)? {
                        confirmed.entry(hash).or_default().push(file.id);
                    }
                }
                let mut subgroups: Vec<Vec<i64>> =
                    confirmed.into_values().filter(|g| g.len() >= 2).collect();
                subgroups.sort_by_key(|g| g[0]);
                for member_ids in subgroups {
                    absorbed.extend(&member_ids);
                    computed.push(ComputedGroup {
                        tier: Tier::Exact,
                        confidence: 1.0,
                        member_ids,
                        min_distance: 0,
                    });
                }
            } else {
                let member_ids: Vec<i64> = bucket.iter().map(|f| f.id).collect();
                absorbed.extend(&member_ids);
                computed.push(ComputedGroup {
                    tier: Tier::Exact,
                    confidence: 0.95,
                    member_ids,
                    min_distance: 0,
                });
            }
        }
        Ok(())
    }

    /// Tier 2: BK-tree candidates filtered by dimensions and strict EXIF.
    fn near_tier(
        &self,
        index: &PerceptualIndex,
        candidates: &[&FileRow],
        features: &HashMap<i64, FeatureRow>,
        absorbed: &mut HashSet<i64>,
        computed: &mut Vec<ComputedGroup>,
    ) {
        let candidate_ids: HashSet<i64> = candidates.iter().map(|f| f.id).collect();

        for &file in candidates {
            if absorbed.contains(&file.id) {
                continue;
            }
            let Some(feature) = features.get(&file.id) else {
                continue;
            };
            let Some(phash) = feature.phash else {
                continue;
            };

            let mut hits = index.query(HashKind::Perceptual, phash, self.phash_threshold);
            hits.sort_by_key(|&(id, _)| id);

            let mut member_ids = vec![file.id];
            let mut min_distance = u32::MAX;
            for (other_id, distance) in hits {
                if other_id == file.id
                    || absorbed.contains(&other_id)
                    || !candidate_ids.contains(&other_id)
                    || member_ids.contains(&other_id)
                {
                    continue;
                }
                let Some(other) = features.get(&other_id) else {
                    continue;
                };
                if !self.dimensions_agree(feature, other) {
                    continue;
                }
                if self.strict_exif && !equal_capture_times(feature, other) {
                    continue;
                }
                member_ids.push(other_id);
                min_distance = min_distance.min(distance);
            }

            if member_ids.len() >= 2 {
                absorbed.extend(&member_ids);
                debug!(
                    anchor = file.id,
                    members = member_ids.len(),
                    min_distance,
                    "near group formed"
                );
                computed.push(ComputedGroup {
                    tier: Tier::Near,
                    confidence: self.distance_confidence(min_distance),
                    member_ids,
                    min_distance,
                });
            }
        }
    }

    /// Relative pixel-area deviation within tolerance?
    fn dimensions_agree(&self, a: &FeatureRow, b: &FeatureRow) -> bool {
        let area_a = a.pixel_area() as f64;
        let area_b = b.pixel_area() as f64;
        let max = area_a.max(area_b);
        if max == 0.0 {
            return false;
        }
        (area_a - area_b).abs() / max <= self.dimension_tolerance + f64::EPSILON
    }

    fn distance_confidence(&self, distance: u32) -> f64 {
        if self.phash_threshold == 0 {
            return 1.0;
        }
        (1.0 - distance as f64 / self.phash_threshold as f64).clamp(0.0, 1.0)
    }

    /// Resolve originals, apply overrides, and write groups back.
    fn persist(
        &self,
        store: &Store,
        computed: Vec<ComputedGroup>,
        files: &HashMap<i64, &FileRow>,
        features: &HashMap<i64, FeatureRow>,
        events: &EventSender,
    ) -> Result<GroupingReport, StoreError> {
        let mut report = GroupingReport::default();
        let mut used_ids: HashSet<i64> = HashSet::new();

        for group in computed {
            let pairs: Vec<(&FileRow, &FeatureRow)> = group
                .member_ids
                .iter()
                .filter_map(|id| Some((*files.get(id)?, features.get(id)?)))
                .collect();
            let Some(auto_pick) = select_original(pairs) else {
                continue;
            };

            // A recomputed group keeps the id of the stored group it
            // overlaps; the first claimant wins when an old group split
            let reuse_id = store
                .group_containing_any(&group.member_ids)?
                .filter(|id| !used_ids.contains(id));

            let mut original = auto_pick;
            if let Some(group_id) = reuse_id {
                if let Some(active) = store.active_override(group_id)? {
                    match store.file_by_id(active.chosen_file_id) {
                        Ok(chosen) if !chosen.is_missing => {
                            if group.member_ids.contains(&chosen.id) {
                                original = chosen.id;
                            }
                        }
                        Ok(chosen) => {
                            store.deactivate_override(active.id)?;
                            report.overrides_dropped += 1;
                            events.send(Event::Override(OverrideEvent::TargetMissing {
                                group_id,
                                chosen_file_id: chosen.id,
                            }));
                        }
                        Err(StoreError::NotFound { .. }) => {
                            store.deactivate_override(active.id)?;
                            report.overrides_dropped += 1;
                            events.send(Event::Override(OverrideEvent::TargetMissing {
                                group_id,
                                chosen_file_id: active.chosen_file_id,
                            }));
                        }
                        Err(other) => return Err(other),
                    }
                }
            }

            let original_phash = features.get(&original).and_then(|f| f.phash);
            let members: Vec<NewMember> = group
                .member_ids
                .iter()
                .map(|&id| NewMember {
                    file_id: id,
                    role: if id == original {
                        MemberRole::Original
                    } else {
                        MemberRole::Duplicate
                    },
                    similarity: self.member_similarity(
                        &group,
                        id,
                        original,
                        original_phash,
                        features,
                    ),
                    note: None,
                })
                .collect();

            let group_id =
                store.persist_group(group.tier, group.confidence, &members, reuse_id, None)?;
            used_ids.insert(group_id);
            report.group_ids.push(group_id);
            report.duplicates += members.len() - 1;
            match group.tier {
                Tier::Exact => report.exact_groups += 1,
                Tier::Near => report.near_groups += 1,
            }
            events.send(Event::Group(GroupEvent::GroupPersisted {
                group_id,
                tier: group.tier.as_str().to_string(),
                member_count: members.len(),
            }));
        }

        store.delete_groups_except(&report.group_ids)?;
        Ok(report)
    }

    fn member_similarity(
        &self,
        group: &ComputedGroup,
        member_id: i64,
        original_id: i64,
        original_phash: Option<u64>,
        features: &HashMap<i64, FeatureRow>,
    ) -> f64 {
        if member_id == original_id || group.tier == Tier::Exact {
            return 1.0;
        }
        let member_phash = features.get(&member_id).and_then(|f| f.phash);
        match (original_phash, member_phash) {
            (Some(a), Some(b)) => {
                self.distance_confidence(crate::core::hasher::hamming_distance(a, b))
            }
            _ => self.distance_confidence(group.min_distance),
        }
    }
}

fn equal_capture_times(a: &FeatureRow, b: &FeatureRow) -> bool {
    matches!(
        (a.taken_at_ns, b.taken_at_ns),
        (Some(ta), Some(tb)) if ta == tb
    )
}
