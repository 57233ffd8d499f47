use crate::processor::{Batch, Normalizer, StagedDataset, combine};
use crate::storage::{DownloadedObject, ListOptions, ObjectStoreClient};
use crate::utils::paths::{PathBuilder, TimeBucket};
use crate::warehouse::{LoadReport, Warehouse};
use chrono::{DateTime, Utc};
use common::Result;
use common::config::PipelineSettings;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const STAGED_FILE_NAME: &str = "cleaned_data.csv";

/// Lifecycle of one scope (an hour bucket, or the historical prefix) within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Pending,
    Listed,
    Downloaded,
    Normalized,
    Loaded,
    Cleaned,
    Skipped,
    Failed,
}

/// One unit of work: a key prefix and the local directory it is processed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub label: String,
    pub prefix: String,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScopeOutcome {
    pub label: String,
    pub state: BucketState,
    pub listed: usize,
    pub downloaded: usize,
    pub rejected_files: usize,
    pub dropped_rows: usize,
    pub load: Option<LoadReport>,
    pub error: Option<String>,
}

impl ScopeOutcome {
    fn pending(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: BucketState::Pending,
            listed: 0,
            downloaded: 0,
            rejected_files: 0,
            dropped_rows: 0,
            load: None,
            error: None,
        }
    }

    fn advance(&mut self, state: BucketState) {
        debug!(scope = %self.label, from = ?self.state, to = ?state, "Scope state change");
        self.state = state;
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub loaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub rows_inserted: usize,
    pub outcomes: Vec<ScopeOutcome>,
}

impl RunReport {
    fn record_outcome(&mut self, outcome: ScopeOutcome) {
        match outcome.state {
            BucketState::Loaded | BucketState::Cleaned => {
                self.loaded += 1;
                self.rows_inserted += outcome.load.as_ref().map_or(0, |l| l.inserted);
            }
            BucketState::Skipped => self.skipped += 1,
            _ => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Drives list → download → normalize → combine → stage → load → clean for
/// each scope, one after another.
pub struct Scheduler {
    client: ObjectStoreClient,
    normalizer: Normalizer,
    warehouse: Arc<dyn Warehouse>,
    settings: PipelineSettings,
    work_root: PathBuf,
}

impl Scheduler {
    pub fn new(
        client: ObjectStoreClient,
        warehouse: Arc<dyn Warehouse>,
        settings: &PipelineSettings,
        work_root: &Path,
    ) -> Self {
        Self {
            client,
            normalizer: Normalizer::from_settings(settings),
            warehouse,
            settings: settings.clone(),
            work_root: work_root.to_path_buf(),
        }
    }

    /// The current hour bucket and the `hours - 1` before it, newest first.
    pub fn incremental_scopes(&self, now: DateTime<Utc>, hours: u32) -> Vec<Scope> {
        TimeBucket::recent(now, hours)
            .into_iter()
            .map(|tb| {
                let paths = PathBuilder::new(&self.settings.prefix).with_time_bucket(tb);
                Scope {
                    label: tb.label(),
                    prefix: paths.build_prefix(),
                    work_dir: paths.build_work_dir(&self.work_root),
                }
            })
            .collect()
    }

    pub fn static_scope(&self) -> Scope {
        let paths = PathBuilder::new(&self.settings.prefix);
        Scope {
            label: paths.build_prefix(),
            prefix: paths.build_prefix(),
            work_dir: paths.build_work_dir(&self.work_root),
        }
    }

    /// Processes scopes in order. A scope failure is logged and the next scope
    /// still runs; only a lost warehouse connection stops the run.
    pub async fn run(&self, scopes: &[Scope]) -> Result<RunReport> {
        let mut report = RunReport::default();

        for scope in scopes {
            let outcome = self.process_scope(scope).await?;
            report.record_outcome(outcome);
        }

        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            failed = report.failed,
            rows_inserted = report.rows_inserted,
            "Finished pipeline run"
        );

        Ok(report)
    }

    pub async fn process_scope(&self, scope: &Scope) -> Result<ScopeOutcome> {
        let mut outcome = ScopeOutcome::pending(&scope.label);

        match self.run_scope(scope, &mut outcome).await {
            Ok(()) => Ok(outcome),
            Err(e) if e.is_fatal() => {
                error!(scope = %scope.label, error = %e, "Aborting run");
                Err(e)
            }
            Err(e) => {
                error!(scope = %scope.label, state = ?outcome.state, error = %e, "Scope failed, source files left for the next run");
                outcome.advance(BucketState::Failed);
                outcome.error = Some(e.to_string());
                Ok(outcome)
            }
        }
    }

    async fn run_scope(&self, scope: &Scope, outcome: &mut ScopeOutcome) -> Result<()> {
        let options = ListOptions::new(&scope.prefix, &self.settings.extension);
        let keys = self.client.list_matching(&options).await;
        outcome.listed = keys.len();
        if keys.is_empty() {
            info!(scope = %scope.label, "No data files found");
            outcome.advance(BucketState::Skipped);
            return Ok(());
        }
        outcome.advance(BucketState::Listed);

        clear_work_dir(&scope.work_dir).await?;
        let downloaded = self
            .client
            .download(&keys, &scope.prefix, &scope.work_dir)
            .await?;
        outcome.downloaded = downloaded.len();
        outcome.advance(BucketState::Downloaded);

        let paths: Vec<PathBuf> = downloaded.iter().map(|d| d.local_path.clone()).collect();
        let normalized = self.normalizer.normalize_files(&paths);
        outcome.rejected_files = normalized.rejected.len();
        outcome.dropped_rows = normalized.dropped_rows();
        let batch = combine(&normalized.files);
        outcome.advance(BucketState::Normalized);

        if batch.is_empty() {
            warn!(scope = %scope.label, "No valid data to load");
            outcome.advance(BucketState::Skipped);
            return Ok(());
        }

        let staged = StagedDataset::write(&batch, &scope.work_dir.join(STAGED_FILE_NAME))?;
        let staged_batch: Batch = staged.read()?;
        let report = self.warehouse.upload(&staged_batch).await?;
        let complete = report.is_complete();
        outcome.load = Some(report);
        outcome.advance(BucketState::Loaded);

        let rejected: HashSet<&PathBuf> = normalized.rejected.iter().map(|(p, _)| p).collect();
        let consumed: Vec<&DownloadedObject> = downloaded
            .iter()
            .filter(|d| !rejected.contains(&d.local_path))
            .collect();
        if self.clean_up(&staged, &downloaded, &consumed, complete).await {
            outcome.advance(BucketState::Cleaned);
        }

        Ok(())
    }

    /// Removes local copies and the staged file, then (if configured) the
    /// consumed source objects. Sources are only purged when every staged row
    /// reached the warehouse. Returns whether everything went.
    async fn clean_up(
        &self,
        staged: &StagedDataset,
        downloaded: &[DownloadedObject],
        consumed: &[&DownloadedObject],
        complete: bool,
    ) -> bool {
        let mut clean = true;

        for object in downloaded {
            if let Err(e) = tokio::fs::remove_file(&object.local_path).await {
                warn!(path = %object.local_path.display(), error = %e, "Could not remove local file");
                clean = false;
            }
        }
        if let Err(e) = staged.remove() {
            warn!(path = %staged.path().display(), error = %e, "Could not remove staged file");
            clean = false;
        }

        if self.settings.purge_remote && !complete {
            warn!(bucket = %self.client.bucket(), "Upload left rows out, keeping source objects");
            clean = false;
        } else if self.settings.purge_remote {
            let keys: Vec<String> = consumed.iter().map(|o| o.key.clone()).collect();
            let purged = self.client.purge(&keys).await;
            info!(bucket = %self.client.bucket(), purged, "Purged consumed source objects");
            clean &= purged == keys.len();
        }

        clean
    }
}

/// Drops whatever an earlier, interrupted run left in the scope's directory.
async fn clear_work_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await? {
        debug!(dir = %dir.display(), "Clearing stale local files");
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}
