//! One exclusive build → merge → commit → weights cycle.
//!
//! Only one cycle runs at a time: a second `run_cycle` while one is active is
//! rejected with [`IndexError::CycleInProgress`] rather than queued. Staging
//! writes made through [`IndexCoordinator::stage_batch`] wait while a cycle
//! holds staging, which it does from its snapshot until staging is cleared.

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;

use crate::builder::build_postings;
use crate::catalog::{CatalogStore, Table};
use crate::commit::{migrate_staging, replace_index};
use crate::error::{IndexError, Result};
use crate::index::{GameId, GameRecord};
use crate::merge::{merge_into_temp, MergeStats};
use crate::persist::{save_meta, IndexPaths, MetaFile};
use crate::weights::{self, SkipReason, WeightOutcome};

const META_VERSION: u32 = 1;

/// What a cycle does when staging is empty. Merge and commit are always
/// skipped in that case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyStagingPolicy {
    /// Leave index, weights and catalog exactly as they are.
    #[default]
    SkipWeights,
    /// Recompute tag weights and game norms from the current index anyway.
    RecomputeWeights,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub root: PathBuf,
    pub empty_staging: EmptyStagingPolicy,
}

impl CoordinatorConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), empty_staging: EmptyStagingPolicy::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub staged: usize,
    pub postings: usize,
    /// `None` when merge and commit were skipped.
    pub merge: Option<MergeStats>,
    pub migrated: usize,
    pub skipped_duplicates: Vec<GameId>,
    pub weights: WeightOutcome,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub staged: usize,
    pub skipped: Vec<GameId>,
}

pub struct IndexCoordinator {
    paths: IndexPaths,
    policy: EmptyStagingPolicy,
    cycle: Mutex<()>,
    staging: Mutex<CatalogStore>,
    main: Mutex<CatalogStore>,
}

impl IndexCoordinator {
    /// Open the data directory, clearing leftovers of an interrupted cycle.
    ///
    /// The catalog lock is taken first: while another process holds the
    /// directory its temp files belong to a live cycle and are left alone.
    pub fn open(config: CoordinatorConfig) -> Result<Self> {
        let paths = IndexPaths::new(&config.root);
        fs::create_dir_all(&paths.root)?;
        let db = sled::open(paths.catalog_dir())?;
        recover_interrupted(&paths)?;
        Ok(Self {
            staging: Mutex::new(CatalogStore::new(&db, Table::Staging)),
            main: Mutex::new(CatalogStore::new(&db, Table::Main)),
            paths,
            policy: config.empty_staging,
            cycle: Mutex::new(()),
        })
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Add ingested games to staging. Games already in the main catalog or
    /// in staging are logged and skipped.
    pub fn stage_batch<I>(&self, records: I) -> Result<StageReport>
    where
        I: IntoIterator<Item = GameRecord>,
    {
        let mut staging = self.staging.lock();
        let main_ids = self.main.lock().session(|main| main.all_ids())?;
        staging.session(|staging| {
            let mut report = StageReport::default();
            for record in records {
                let res = if main_ids.contains(&record.id) {
                    Err(IndexError::DuplicateRecord { id: record.id })
                } else {
                    staging.insert(&record)
                };
                match res {
                    Ok(()) => report.staged += 1,
                    Err(e) if e.is_recoverable() || matches!(e, IndexError::InvalidGameId(_)) => {
                        tracing::warn!(id = record.id, title = %record.title, error = %e, "not staging game");
                        report.skipped.push(record.id);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(report)
        })
    }

    pub fn genres_of(&self, id: GameId) -> Result<String> {
        self.main.lock().session(|main| main.genres_of(id))
    }

    pub fn catalog_records(&self) -> Result<Vec<GameRecord>> {
        self.main.lock().session(|main| main.all_records())
    }

    pub fn staged_records(&self) -> Result<Vec<GameRecord>> {
        self.staging.lock().session(|staging| staging.all_records())
    }

    /// Run one full update cycle.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle.try_lock().ok_or(IndexError::CycleInProgress)?;
        let started = Instant::now();

        let mut staging = self.staging.lock();
        let mut main = self.main.lock();
        let report = staging.session(|staging| main.session(|main| self.cycle_locked(staging, main)))?;

        tracing::info!(
            staged = report.staged,
            postings = report.postings,
            migrated = report.migrated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index update cycle complete"
        );
        Ok(report)
    }

    fn cycle_locked(&self, staging: &mut CatalogStore, main: &mut CatalogStore) -> Result<CycleReport> {
        let records = staging.all_records()?;
        let postings = build_postings(&records);
        let mut report = CycleReport {
            staged: records.len(),
            postings: postings.len(),
            merge: None,
            migrated: 0,
            skipped_duplicates: Vec::new(),
            weights: WeightOutcome::Skipped(SkipReason::NothingStaged),
        };

        if records.is_empty() {
            tracing::info!(policy = ?self.policy, "staging is empty, skipping merge and commit");
            if self.policy == EmptyStagingPolicy::RecomputeWeights {
                report.weights = weights::recompute(&self.paths, main)?;
                self.write_meta(&report, main)?;
            }
            return Ok(report);
        }

        let stats = merge_into_temp(&self.paths.index(), &postings, &self.paths.index_temp())?;
        replace_index(&self.paths.index_temp(), &self.paths.index())?;
        report.merge = Some(stats);

        let migration = migrate_staging(staging, main)?;
        report.migrated = migration.migrated;
        report.skipped_duplicates = migration.skipped;

        report.weights = weights::recompute(&self.paths, main)?;
        self.write_meta(&report, main)?;
        Ok(report)
    }

    fn write_meta(&self, report: &CycleReport, main: &CatalogStore) -> Result<()> {
        let num_tags = match (report.merge, report.weights) {
            (Some(stats), _) => stats.tags_written(),
            (None, WeightOutcome::Computed { tags, .. }) => tags,
            (None, WeightOutcome::Skipped(_)) => 0,
        };
        let meta = MetaFile {
            num_games: main.row_count()?,
            num_tags,
            staged: report.staged,
            updated_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| "".into()),
            version: META_VERSION,
        };
        save_meta(&self.paths, &meta)
    }
}

/// Remove temp files left by a cycle that died before publishing them.
/// The canonical index and weight files are never touched. Returns whether
/// anything was cleaned up.
pub fn recover_interrupted(paths: &IndexPaths) -> Result<bool> {
    let mut found = false;
    for temp in [paths.index_temp(), paths.weights_temp(), paths.meta_temp()] {
        match fs::remove_file(&temp) {
            Ok(()) => {
                tracing::warn!(file = %temp.display(), "removed temp file from an interrupted update cycle");
                found = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(found)
}
