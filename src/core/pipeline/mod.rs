//! # Pipeline Module
//!
//! The rescan coordinator: wraps scanner, feature extraction, index
//! maintenance, grouping, escalation, and override upkeep into one run,
//! choosing between delta and full-rebuild work.
//!
//! Three modes:
//! - **Delta** - scan the roots, recompute features only for files whose
//!   size or mtime changed. Work is proportional to the change set.
//! - **MissingFeatures** - skip path-by-path scanning and process only
//!   files that lack a feature row (crash recovery).
//! - **FullRebuild** - optionally snapshot groups and overrides, wipe
//!   all derived state, then run a delta over the empty store and remap
//!   the snapshot by path.
//!
//! Long-running phases are split into unit tasks on the worker pool;
//! grouping starts only after every feature task has committed.

mod progress;

pub use progress::ProgressReporter;

use crate::core::escalation::EscalationEngine;
use crate::core::extractor::{ExtractOutcome, FeatureExtractor};
use crate::core::grouping::GroupingEngine;
use crate::core::index::PerceptualIndex;
use crate::core::overrides::{detect_conflicts, reap_orphans};
use crate::core::scanner::{detect_missing, PathFilter, RootScan, Scanner};
use crate::error::{EngineError, PoolError, StoreError};
use crate::events::{ConflictInfo, Event, EventSender, RescanEvent};
use crate::pool::{PoolConfig, Priority, TaskHandle, TaskOutcome, WorkerPool};
use crate::settings::Settings;
use crate::store::{schema, GroupSnapshot, MemberRole, OverrideSnapshot, Store};
use crossbeam_channel::bounded;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// How a rescan should treat existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanMode {
    Delta,
    MissingFeatures,
    FullRebuild {
        preserve_overrides: bool,
        preserve_groups: bool,
    },
}

impl RescanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RescanMode::Delta => "delta",
            RescanMode::MissingFeatures => "missing_features",
            RescanMode::FullRebuild { .. } => "full_rebuild",
        }
    }
}

/// Summary returned by every completed pipeline run.
#[derive(Debug, Clone)]
pub struct RescanStats {
    pub run_id: String,
    pub mode: &'static str,
    pub files_scanned: usize,
    pub files_discovered: usize,
    pub files_changed: usize,
    pub files_missing: usize,
    pub features_computed: usize,
    /// Feature rows served from the store instead of recomputed
    pub features_reused: usize,
    pub unprocessable: usize,
    pub groups_created: usize,
    pub exact_groups: usize,
    pub near_groups: usize,
    pub duplicates: usize,
    pub safe_duplicates_promoted: usize,
    pub overrides_dropped: usize,
    pub overrides_restored: usize,
    /// Active overrides that now disagree with auto-selection
    pub conflicts: Vec<ConflictInfo>,
    /// Per-entry scan errors; the run continued past each
    pub scan_errors: Vec<String>,
    pub duration_ms: u64,
}

impl RescanStats {
    fn new(run_id: String, mode: &'static str) -> Self {
        Self {
            run_id,
            mode,
            files_scanned: 0,
            files_discovered: 0,
            files_changed: 0,
            files_missing: 0,
            features_computed: 0,
            features_reused: 0,
            unprocessable: 0,
            groups_created: 0,
            exact_groups: 0,
            near_groups: 0,
            duplicates: 0,
            safe_duplicates_promoted: 0,
            overrides_dropped: 0,
            overrides_restored: 0,
            conflicts: Vec::new(),
            scan_errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// reused / (reused + recomputed); 1.0 when nothing was recomputed.
    pub fn efficiency(&self) -> f64 {
        let total = self.features_reused + self.features_computed;
        if total == 0 {
            1.0
        } else {
            self.features_reused as f64 / total as f64
        }
    }
}

/// Orchestrates pipeline runs. Reusable across runs in one process; the
/// BK-tree index carries over so delta runs can update it incrementally.
pub struct RescanCoordinator {
    settings: Settings,
    filter: PathFilter,
    index: Arc<RwLock<PerceptualIndex>>,
}

impl RescanCoordinator {
    pub fn new(settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self {
            settings,
            filter: PathFilter::new(),
            index: Arc::new(RwLock::new(PerceptualIndex::empty())),
        })
    }

    /// Install include/exclude glob lists for the scanner.
    pub fn with_patterns(
        mut self,
        includes: &[String],
        excludes: &[String],
    ) -> Result<Self, EngineError> {
        self.filter = PathFilter::new().with_patterns(includes, excludes)?;
        Ok(self)
    }

    /// Recommend a mode from feature coverage and the schema version:
    /// Delta at >= 95% coverage, MissingFeatures between 50% and 95%,
    /// FullRebuild below that or when the schema generation moved.
    pub fn recommend_mode(&self, store: &Store) -> Result<RescanMode, StoreError> {
        if store.schema_version()? != schema::SCHEMA_VERSION {
            return Ok(RescanMode::FullRebuild {
                preserve_overrides: true,
                preserve_groups: false,
            });
        }
        let coverage = store.stats()?.feature_coverage();
        Ok(if coverage >= 0.95 {
            RescanMode::Delta
        } else if coverage >= 0.5 {
            RescanMode::MissingFeatures
        } else {
            RescanMode::FullRebuild {
                preserve_overrides: true,
                preserve_groups: false,
            }
        })
    }

    /// Run one pipeline invocation. Returns stats on completion; errors
    /// only when no useful work could be done (configuration or store
    /// failure, or the pool shutting down mid-run).
    pub fn run(
        &self,
        store: &Arc<Store>,
        pool: &WorkerPool,
        mode: RescanMode,
        roots: &[PathBuf],
        events: &EventSender,
    ) -> Result<RescanStats, EngineError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let mut stats = RescanStats::new(run_id.clone(), mode.as_str());

        let installed = store.schema_version().map_err(EngineError::Store)?;
        if installed != schema::SCHEMA_VERSION {
            return Err(EngineError::Store(StoreError::MigrationFailed {
                version: installed,
                reason: "store must be migrated before running the pipeline".to_string(),
            }));
        }

        events.send(Event::Rescan(RescanEvent::Started {
            run_id: run_id.clone(),
            mode: mode.as_str().to_string(),
        }));
        info!(run = %run_id, mode = mode.as_str(), roots = roots.len(), "pipeline started");

        let progress = Arc::new(ProgressReporter::new(events.clone()));

        // Full rebuild: snapshot what survives, then wipe derived state
        let mut override_snapshot: Vec<OverrideSnapshot> = Vec::new();
        let mut group_snapshot: Vec<GroupSnapshot> = Vec::new();
        if let RescanMode::FullRebuild {
            preserve_overrides,
            preserve_groups,
        } = mode
        {
            if preserve_overrides {
                override_snapshot = store.snapshot_overrides().map_err(EngineError::Store)?;
            }
            if preserve_groups {
                group_snapshot = store.snapshot_groups().map_err(EngineError::Store)?;
            }
            store.truncate_for_rebuild().map_err(EngineError::Store)?;
        }

        // Phase 1: scan, one pool task per root
        if mode != RescanMode::MissingFeatures {
            let merged = self.scan_phase(store, pool, roots, events, &progress, &run_id)?;
            stats.files_scanned = merged.files_seen();
            stats.files_discovered = merged.discovered;
            stats.files_changed = merged.changed;
            stats.scan_errors = merged.errors.clone();

            let vanished = detect_missing(store, roots, &merged.seen, events)
                .map_err(EngineError::Store)?;
            stats.files_missing = vanished.len();
        }

        // Phase 2: features for whatever the scan left flagged
        let needing = match mode {
            RescanMode::MissingFeatures => store.files_lacking_features(),
            _ => store.files_needing_features(),
        }
        .map_err(EngineError::Store)?;
        stats.features_reused = store.stats().map_err(EngineError::Store)?.features;
        progress.set_reused(stats.features_reused);

        let (computed, unprocessable, new_feature_ids) =
            self.feature_phase(store, pool, needing, events, &progress, &run_id)?;
        stats.features_computed = computed;
        stats.unprocessable = unprocessable;

        // Phase 3: bring the index up to date
        self.refresh_index(store, mode, &new_feature_ids)?;

        // Phase 4: grouping on the pool, after features are committed
        let grouping = self.grouping_phase(store, pool, events, &run_id)?;
        stats.groups_created = grouping.group_ids.len();
        stats.exact_groups = grouping.exact_groups;
        stats.near_groups = grouping.near_groups;
        stats.duplicates = grouping.duplicates;
        stats.overrides_dropped = grouping.overrides_dropped;
        progress.set_groups(stats.groups_created);

        // Full rebuild: remap preserved state by path
        if !group_snapshot.is_empty() {
            self.restore_group_hints(store, &group_snapshot)?;
        }
        if !override_snapshot.is_empty() {
            let (restored, dropped) = restore_overrides(store, &override_snapshot)?;
            stats.overrides_restored = restored;
            stats.overrides_dropped += dropped;
        }

        // Phase 5: escalation and override upkeep
        let escalation = EscalationEngine::from_settings(&self.settings)
            .run(store, events)
            .map_err(EngineError::Store)?;
        stats.safe_duplicates_promoted = escalation.promoted;

        let reaped = reap_orphans(store, events).map_err(EngineError::Store)?;
        stats.overrides_dropped += reaped.len();
        stats.conflicts = detect_conflicts(store).map_err(EngineError::Store)?;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        progress.force_emit();
        events.send(Event::Rescan(RescanEvent::Completed { run_id }));
        info!(
            run = %stats.run_id,
            groups = stats.groups_created,
            computed = stats.features_computed,
            reused = stats.features_reused,
            "pipeline complete"
        );
        Ok(stats)
    }

    fn scan_phase(
        &self,
        store: &Arc<Store>,
        pool: &WorkerPool,
        roots: &[PathBuf],
        events: &EventSender,
        progress: &Arc<ProgressReporter>,
        run_id: &str,
    ) -> Result<RootScan, EngineError> {
        let merged = Arc::new(Mutex::new(RootScan::default()));
        let mut handles = Vec::with_capacity(roots.len());

        for (index, root) in roots.iter().enumerate() {
            let store = Arc::clone(store);
            let root = root.clone();
            let events = events.clone();
            let merged = Arc::clone(&merged);
            let progress = Arc::clone(progress);
            let filter = self.filter.clone();

            let handle = pool.submit(
                format!("scan:{}:{}", run_id, index),
                Priority::Normal,
                "scan",
                move || {
                    let scanner = Scanner::new(filter);
                    let outcome = scanner.scan_root(&store, &root, &events);
                    let mut guard = merged.lock().map_err(|_| "scan aggregation poisoned")?;
                    match outcome {
                        Ok(report) => {
                            progress.add_scanned(report.files_seen());
                            guard.merge(report);
                        }
                        Err(error) => {
                            // Root-level trouble is per-entry policy:
                            // record it and keep the run alive
                            warn!(root = %root.display(), %error, "root scan failed");
                            guard.errors.push(error.to_string());
                        }
                    }
                    Ok(())
                },
            )?;
            handles.push(handle);
        }

        wait_all(handles)?;
        let report = Arc::try_unwrap(merged)
            .map_err(|_| EngineError::Store(StoreError::QueryFailed(
                "scan aggregation still shared after join".to_string(),
            )))?
            .into_inner()
            .map_err(|_| EngineError::Store(StoreError::QueryFailed(
                "scan aggregation poisoned".to_string(),
            )))?;
        Ok(report)
    }

    fn feature_phase(
        &self,
        store: &Arc<Store>,
        pool: &WorkerPool,
        needing: Vec<crate::store::FileRow>,
        events: &EventSender,
        progress: &Arc<ProgressReporter>,
        run_id: &str,
    ) -> Result<(usize, usize, Vec<i64>), EngineError> {
        use std::sync::atomic::{AtomicUsize, Ordering};

        events.send(Event::Feature(crate::events::FeatureEvent::Started {
            total_files: needing.len(),
        }));

        let computed = Arc::new(AtomicUsize::new(0));
        let unprocessable = Arc::new(AtomicUsize::new(0));
        let new_ids = Arc::new(Mutex::new(Vec::new()));
        let batch_size = self.settings.batches.batch_hashing.max(1);

        let mut handles = Vec::new();
        for (batch_index, batch) in needing.chunks(batch_size).enumerate() {
            let store = Arc::clone(store);
            let events = events.clone();
            let progress = Arc::clone(progress);
            let computed = Arc::clone(&computed);
            let unprocessable = Arc::clone(&unprocessable);
            let new_ids = Arc::clone(&new_ids);
            let settings = self.settings.clone();
            let batch: Vec<crate::store::FileRow> = batch.to_vec();

            let handle = pool.submit(
                format!("features:{}:{}", run_id, batch_index),
                Priority::Normal,
                "hash",
                move || {
                    let extractor = FeatureExtractor::from_settings(&settings);
                    for file in &batch {
                        match extractor.process(&store, file, &events) {
                            Ok(ExtractOutcome::Computed) => {
                                computed.fetch_add(1, Ordering::SeqCst);
                                progress.add_computed(1);
                                if let Ok(mut ids) = new_ids.lock() {
                                    ids.push(file.id);
                                }
                            }
                            Ok(ExtractOutcome::Unprocessable(_)) => {
                                unprocessable.fetch_add(1, Ordering::SeqCst);
                            }
                            // Store failure is fatal to the run
                            Err(error) => return Err(error.to_string()),
                        }
                    }
                    Ok(())
                },
            )?;
            handles.push(handle);
        }

        wait_all(handles)?;
        events.send(Event::Feature(crate::events::FeatureEvent::Completed {
            computed: computed.load(Ordering::SeqCst),
            unprocessable: unprocessable.load(Ordering::SeqCst),
        }));

        let ids = new_ids
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok((
            computed.load(Ordering::SeqCst),
            unprocessable.load(Ordering::SeqCst),
            ids,
        ))
    }

    /// Rebuild the index wholesale on a full rebuild, when it is empty,
    /// or when it has outgrown its last build; otherwise insert just the
    /// features computed this run.
    fn refresh_index(
        &self,
        store: &Store,
        mode: RescanMode,
        new_feature_ids: &[i64],
    ) -> Result<(), EngineError> {
        let mut index = self
            .index
            .write()
            .map_err(|_| EngineError::Store(StoreError::QueryFailed(
                "index lock poisoned".to_string(),
            )))?;

        let full = matches!(mode, RescanMode::FullRebuild { .. });
        if full || index.tree(crate::core::hasher::HashKind::Perceptual).is_empty() {
            *index = PerceptualIndex::build_from_store(store).map_err(EngineError::Store)?;
            return Ok(());
        }

        let features = store
            .features_by_file_ids(new_feature_ids)
            .map_err(EngineError::Store)?;
        for feature in features {
            index.insert_hashes(feature.file_id, feature.phash, feature.dhash, feature.ahash);
        }
        if index.outgrown() {
            *index = PerceptualIndex::build_from_store(store).map_err(EngineError::Store)?;
        }
        Ok(())
    }

    fn grouping_phase(
        &self,
        store: &Arc<Store>,
        pool: &WorkerPool,
        events: &EventSender,
        run_id: &str,
    ) -> Result<crate::core::grouping::GroupingReport, EngineError> {
        let (report_tx, report_rx) = bounded(1);
        let store = Arc::clone(store);
        let events_clone = events.clone();
        let settings = self.settings.clone();
        let index = Arc::clone(&self.index);

        let handle = pool.submit(
            format!("grouping:{}", run_id),
            Priority::Normal,
            "group",
            move || {
                let guard = index.read().map_err(|_| "index lock poisoned")?;
                let engine = GroupingEngine::from_settings(&settings);
                let report = engine
                    .run(&store, &guard, &events_clone)
                    .map_err(|e| e.to_string())?;
                let _ = report_tx.send(report);
                Ok(())
            },
        )?;

        wait_all(vec![handle])?;
        report_rx
            .try_recv()
            .map_err(|_| EngineError::Store(StoreError::QueryFailed(
                "grouping task returned no report".to_string(),
            )))
    }

    /// Re-seed creation times for rebuilt groups whose member path sets
    /// match a snapshot group.
    fn restore_group_hints(
        &self,
        store: &Store,
        snapshot: &[GroupSnapshot],
    ) -> Result<(), EngineError> {
        let hints: HashMap<Vec<PathBuf>, i64> = snapshot
            .iter()
            .map(|group| {
                let mut paths: Vec<PathBuf> =
                    group.member_paths.iter().map(|(p, _)| p.clone()).collect();
                paths.sort();
                (paths, group.created_at_ns)
            })
            .collect();

        for summary in store
            .list_group_summaries(None, false)
            .map_err(EngineError::Store)?
        {
            let mut paths: Vec<PathBuf> =
                summary.members.iter().map(|m| m.path.clone()).collect();
            paths.sort();
            if let Some(&created_at) = hints.get(&paths) {
                store
                    .set_group_created_at(summary.id, created_at)
                    .map_err(EngineError::Store)?;
            }
        }
        Ok(())
    }
}

/// Remap snapshot overrides onto the rebuilt store by path. Overrides
/// whose chosen path no longer maps to a live file, or whose file landed
/// in no group, are dropped.
fn restore_overrides(
    store: &Store,
    snapshot: &[OverrideSnapshot],
) -> Result<(usize, usize), EngineError> {
    let mut restored = 0;
    let mut dropped = 0;

    for entry in snapshot {
        let chosen = match store.file_by_path(&entry.chosen_path).map_err(EngineError::Store)? {
            Some(file) if !file.is_missing => file,
            _ => {
                dropped += 1;
                continue;
            }
        };
        let Some(group_id) = store
            .group_containing_any(&[chosen.id])
            .map_err(EngineError::Store)?
        else {
            dropped += 1;
            continue;
        };

        let auto_id = match &entry.auto_path {
            Some(path) => store
                .file_by_path(path)
                .map_err(EngineError::Store)?
                .map(|f| f.id)
                .unwrap_or(chosen.id),
            None => chosen.id,
        };

        store
            .put_override_at(
                group_id,
                chosen.id,
                auto_id,
                entry.override_type,
                entry.reason,
                entry.note.as_deref(),
                entry.created_at_ns,
            )
            .map_err(EngineError::Store)?;

        // Reflect the restored decision in member roles right away
        let members = store.members_of(group_id).map_err(EngineError::Store)?;
        if members.iter().any(|m| m.file_id == chosen.id) {
            if let Some(current) = members.iter().find(|m| m.role == MemberRole::Original) {
                if current.file_id != chosen.id {
                    store
                        .update_member_role(group_id, current.file_id, MemberRole::Duplicate, None)
                        .map_err(EngineError::Store)?;
                    store
                        .update_member_role(group_id, chosen.id, MemberRole::Original, None)
                        .map_err(EngineError::Store)?;
                }
            }
        }
        restored += 1;
    }

    Ok((restored, dropped))
}

/// Await a set of task handles; a dropped task means the pool is
/// shutting down, a failed task reports a fatal store error.
fn wait_all(handles: Vec<TaskHandle>) -> Result<(), EngineError> {
    for handle in handles {
        match handle.wait() {
            TaskOutcome::Completed => {}
            TaskOutcome::Failed(message) => {
                return Err(EngineError::Store(StoreError::QueryFailed(message)));
            }
            TaskOutcome::Dropped => {
                return Err(EngineError::Pool(PoolError::NotAccepting {
                    state: "stopping".to_string(),
                }));
            }
        }
    }
    Ok(())
}

/// One-shot convenience: build a pool from the settings, run, stop the
/// pool. Hosts that need pause/resume own the pool and use
/// [`RescanCoordinator::run`] directly.
pub fn run_pipeline(
    store: &Arc<Store>,
    settings: &Settings,
    mode: RescanMode,
    roots: &[PathBuf],
    events: &EventSender,
) -> Result<RescanStats, EngineError> {
    let coordinator = RescanCoordinator::new(settings.clone())?;
    let pool = WorkerPool::start(
        PoolConfig::from_settings(&settings.concurrency),
        events.clone(),
    );
    let result = coordinator.run(store, &pool, mode, roots, events);
    pool.stop(Duration::from_secs(30));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::null_sender;
    use crate::store::test_support::open_store;

    fn arc_store() -> Arc<Store> {
        Arc::new(open_store())
    }

    #[test]
    fn mode_strings_are_stable() {
        assert_eq!(RescanMode::Delta.as_str(), "delta");
        assert_eq!(RescanMode::MissingFeatures.as_str(), "missing_features");
        assert_eq!(
            RescanMode::FullRebuild {
                preserve_overrides: true,
                preserve_groups: false
            }
            .as_str(),
            "full_rebuild"
        );
    }

    #[test]
    fn efficiency_of_untouched_run_is_full() {
        let stats = RescanStats::new("r".to_string(), "delta");
        assert_eq!(stats.efficiency(), 1.0);
    }

    #[test]
    fn empty_store_recommends_delta() {
        let coordinator = RescanCoordinator::new(Settings::default()).unwrap();
        let store = open_store();
        // Empty store: full coverage by definition
        assert_eq!(
            coordinator.recommend_mode(&store).unwrap(),
            RescanMode::Delta
        );
    }

    #[test]
    fn unmigrated_store_recommends_full_rebuild() {
        let coordinator = RescanCoordinator::new(Settings::default()).unwrap();
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            coordinator.recommend_mode(&store).unwrap(),
            RescanMode::FullRebuild { .. }
        ));
    }

    #[test]
    fn low_coverage_recommends_missing_features_or_rebuild() {
        use crate::store::FeatureRow;
        use std::path::Path;

        let coordinator = RescanCoordinator::new(Settings::default()).unwrap();
        let store = open_store();
        // 10 files, 6 with features: 60% coverage
        for i in 0..10 {
            let (id, _) = store
                .reconcile_file(Path::new(&format!("/p/{}.jpg", i)), 10, 1)
                .unwrap();
            if i < 6 {
                store
                    .put_feature(&FeatureRow {
                        file_id: id,
                        phash: Some(i),
                        dhash: Some(i),
                        ahash: Some(i),
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
        }
        assert_eq!(
            coordinator.recommend_mode(&store).unwrap(),
            RescanMode::MissingFeatures
        );
    }

    #[test]
    fn run_refuses_unmigrated_store() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let result = run_pipeline(
            &store,
            &Settings::default(),
            RescanMode::Delta,
            &[],
            &null_sender(),
        );
        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::MigrationFailed { .. }))
        ));
    }

    #[test]
    fn empty_roots_run_succeeds_with_zero_groups() {
        let store = arc_store();
        let stats = run_pipeline(
            &store,
            &Settings::default(),
            RescanMode::Delta,
            &[],
            &null_sender(),
        )
        .unwrap();
        assert_eq!(stats.files_scanned, 0);
        assert_eq!(stats.groups_created, 0);
        assert_eq!(stats.efficiency(), 1.0);
    }
}
