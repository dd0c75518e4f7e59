//! Batch orchestration.
//!
//! A [`MergeJob`] turns a [`JobConfig`] into a [`MergePlan`] and runs it
//! level by level. Batches of one level run on a dedicated rayon pool of
//! `parallelism` threads; each batch is a single-threaded
//! [`merge_shards`] call. Completed batches are recorded in a
//! [`JobManifest`] so a job restarted with the same id skips them.
//!
//! Intermediate shards live in `tmp_dir/shardsum-<job_id>/` and are deleted
//! once their consumer batch has committed. The final output appears only
//! after every level has succeeded.

pub mod config;
pub mod manifest;
pub mod plan;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{ErrorKind, Result, ShardsumError};
use crate::pipeline::{BatchOutcome, PipelineOptions, merge_shards};

pub use self::config::{JobConfig, JobConfigBuilder};
pub use self::manifest::JobManifest;
pub use self::plan::{BatchId, MergePlan, PlannedBatch, PlannedLevel};
pub use self::state::{FailureReason, JobState, Stage};

/// An error tagged with the stage it happened in.
type StagedError = (Stage, ShardsumError);

fn at(stage: Stage) -> impl FnOnce(ShardsumError) -> StagedError {
    move |err| (stage, err)
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub output: PathBuf,
    pub inputs: usize,
    /// Intermediate levels, not counting the final merge.
    pub levels: usize,
    pub batches_run: usize,
    /// Batches already completed by an earlier attempt of the same job.
    pub batches_skipped: usize,
    /// Records read across every batch run by this attempt.
    pub records_read: u64,
    pub records_written: u64,
    pub records_filtered: u64,
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Progress {
    batches_run: usize,
    batches_skipped: usize,
    records_read: u64,
}

impl Progress {
    fn add(&mut self, outcome: &BatchOutcome) {
        self.batches_run += 1;
        self.records_read += outcome.records_read;
    }
}

/// A configured merge job.
pub struct MergeJob {
    config: JobConfig,
    job_id: String,
    cancel: CancellationToken,
    state: Mutex<JobState>,
}

impl std::fmt::Debug for MergeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeJob")
            .field("job_id", &self.job_id)
            .field("output", &self.config.output_path)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl MergeJob {
    /// Validate `config` and prepare a job. A missing `job_id` gets a fresh
    /// UUID.
    pub fn new(config: JobConfig) -> Result<Self> {
        config.validate()?;
        let job_id = config
            .job_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(MergeJob {
            config,
            job_id,
            cancel: CancellationToken::new(),
            state: Mutex::new(JobState::Pending),
        })
    }

    /// Use `token` to cancel this job from elsewhere.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Directory holding this job's manifest and intermediate shards.
    pub fn work_dir(&self) -> PathBuf {
        self.config.tmp_dir.join(format!("shardsum-{}", self.job_id))
    }

    pub fn state(&self) -> JobState {
        self.state.lock().clone()
    }

    /// Compute the merge tree without touching the file system beyond
    /// listing `input_dir`.
    pub fn plan(&self) -> Result<MergePlan> {
        let inputs = self.config.resolve_inputs()?;
        Ok(MergePlan::build(
            &inputs,
            self.config.batch_width,
            &self.work_dir(),
            &self.config.output_path,
        ))
    }

    /// Run the job to completion.
    ///
    /// On failure the job ends in [`JobState::Failed`], the output path is
    /// left untouched and completed intermediates stay in the work directory
    /// for a later attempt with the same job id.
    pub fn run(&self) -> Result<JobReport> {
        {
            let state = self.state.lock();
            if *state != JobState::Pending {
                return Err(ShardsumError::invalid_config(format!(
                    "job {} has already run ({state})",
                    self.job_id
                )));
            }
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            "Job {} started: output {}",
            self.job_id,
            self.config.output_path.display()
        );

        match self.execute() {
            Ok((plan, progress, resumed, final_outcome)) => {
                let report = JobReport {
                    job_id: self.job_id.clone(),
                    output: final_outcome.output,
                    inputs: plan.input_count,
                    levels: plan.levels.len(),
                    batches_run: progress.batches_run,
                    batches_skipped: progress.batches_skipped,
                    records_read: progress.records_read,
                    records_written: final_outcome.records_written,
                    records_filtered: final_outcome.records_filtered,
                    resumed,
                    started_at,
                    elapsed_ms: clock.elapsed().as_millis() as u64,
                };
                info!(
                    "Job {} done: {} records written to {} in {} ms",
                    self.job_id,
                    report.records_written,
                    report.output.display(),
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err((stage, err)) => {
                let reason = FailureReason::new(stage, &err);
                error!("Job {} {reason}", self.job_id);
                self.transition(JobState::Failed(reason));
                Err(err)
            }
        }
    }

    fn execute(
        &self,
    ) -> std::result::Result<(MergePlan, Progress, bool, BatchOutcome), StagedError> {
        self.cancel.check().map_err(at(Stage::Planning))?;

        let inputs = self.config.resolve_inputs().map_err(at(Stage::Planning))?;
        self.check_inputs(&inputs).map_err(at(Stage::Planning))?;

        let work_dir = self.work_dir();
        std::fs::create_dir_all(&work_dir)
            .map_err(ShardsumError::from)
            .map_err(at(Stage::Planning))?;
        let fingerprint = manifest::fingerprint(&inputs, &self.config);
        let (manifest, resumed) = JobManifest::open_or_create(&work_dir, &self.job_id, fingerprint)
            .map_err(at(Stage::Planning))?;
        if resumed {
            info!(
                "Job {} resuming with {} completed batches",
                self.job_id,
                manifest.completed.len()
            );
        }
        remove_stale_temp_files(&work_dir, None);
        if let Some(parent) = self.config.output_path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            remove_stale_temp_files(parent, self.config.output_path.file_name());
        }

        let plan = MergePlan::build(&inputs, self.config.batch_width, &work_dir, &self.config.output_path);
        debug!(
            "Job {} planned {} levels, {} batches for {} inputs",
            self.job_id,
            plan.levels.len(),
            plan.total_batches(),
            plan.input_count
        );

        let digests = manifest::batch_digests(&plan);
        let skipped = self.resumable_batches(&plan, &manifest, &digests);
        let manifest = Mutex::new(manifest);
        let options = self.config.pipeline_options();
        let pool = self.thread_pool().map_err(at(Stage::Planning))?;
        let mut progress = Progress::default();

        for level in &plan.levels {
            self.transition(JobState::BatchingLevel(level.level));
            let level_token = self.cancel.child();

            let run_batch = |batch: &PlannedBatch| -> std::result::Result<Option<BatchOutcome>, StagedError> {
                if skipped.contains(&batch.id) {
                    debug!("Skipping {} (completed earlier)", batch.id);
                    return Ok(None);
                }
                let sources = digests.get(&batch.id).copied().unwrap_or_default();
                match self.run_batch(&plan, batch, sources, &options, &manifest, &level_token) {
                    Ok(outcome) => Ok(Some(outcome)),
                    Err(err) => {
                        level_token.cancel();
                        Err((Stage::Batch(batch.id), err))
                    }
                }
            };

            let results: Vec<_> = match &pool {
                Some(pool) => pool.install(|| level.batches.par_iter().map(run_batch).collect()),
                None => level.batches.iter().map(run_batch).collect(),
            };

            let mut failures = Vec::new();
            for result in results {
                match result {
                    Ok(Some(outcome)) => progress.add(&outcome),
                    Ok(None) => progress.batches_skipped += 1,
                    Err(failure) => failures.push(failure),
                }
            }
            if let Some(failure) = first_failure(failures) {
                return Err(failure);
            }
            info!(
                "Job {} finished level {} ({} batches, {} carried)",
                self.job_id,
                level.level,
                level.batches.len(),
                level.carried.len()
            );
        }

        self.transition(JobState::FinalMerge);
        let final_batch = &plan.final_merge;
        let outcome = merge_shards(
            &final_batch.inputs,
            &final_batch.output,
            self.config.key_filter.as_deref(),
            &options,
            &self.cancel,
        )
        .map_err(at(Stage::FinalMerge))?;
        progress.add(&outcome);

        if self.config.keep_intermediates {
            let mut manifest = manifest.lock();
            let sources = digests.get(&final_batch.id).copied().unwrap_or_default();
            manifest.mark_completed(final_batch.id, sources);
            if let Err(e) = manifest.save(&work_dir) {
                warn!("Job {} could not update its manifest: {e}", self.job_id);
            }
        } else if let Err(e) = std::fs::remove_dir_all(&work_dir) {
            warn!(
                "Job {} could not remove work directory {}: {e}",
                self.job_id,
                work_dir.display()
            );
        }

        self.transition(JobState::Done);
        Ok((plan, progress, resumed, outcome))
    }

    fn check_inputs(&self, inputs: &[PathBuf]) -> Result<()> {
        let output = &self.config.output_path;
        if inputs.iter().any(|input| input == output) {
            return Err(ShardsumError::invalid_config(format!(
                "output {} is also an input",
                output.display()
            )));
        }
        if let Some(filter) = &self.config.key_filter {
            if !filter.is_file() {
                return Err(ShardsumError::invalid_config(format!(
                    "key filter {} does not exist",
                    filter.display()
                )));
            }
        }
        Ok(())
    }

    fn thread_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        if self.config.parallelism <= 1 {
            return Ok(None);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|i| format!("shardsum-worker-{i}"))
            .build()
            .map_err(|e| ShardsumError::invalid_config(format!("cannot start thread pool: {e}")))?;
        Ok(Some(pool))
    }

    /// Batches an earlier attempt committed from the same sources whose
    /// output is still usable: either present, or only needed by a consumer
    /// that is skipped too. Decided from the last level down, since the final
    /// merge always runs.
    fn resumable_batches(
        &self,
        plan: &MergePlan,
        manifest: &JobManifest,
        digests: &HashMap<BatchId, u32>,
    ) -> HashSet<BatchId> {
        let consumers = plan.consumers();
        let mut skipped = HashSet::new();
        for batch in plan.levels.iter().rev().flat_map(|level| level.batches.iter()) {
            let sources = digests.get(&batch.id).copied().unwrap_or_default();
            if !manifest.is_completed(batch.id, sources) {
                if manifest.has_batch(batch.id) {
                    warn!(
                        "Job {} {}: sources changed since it was committed, running it again",
                        self.job_id, batch.id
                    );
                }
                continue;
            }
            let consumed = consumers
                .get(batch.output.as_path())
                .is_some_and(|consumer| skipped.contains(consumer));
            if batch.output.exists() || consumed {
                skipped.insert(batch.id);
            }
        }
        skipped
    }

    fn run_batch(
        &self,
        plan: &MergePlan,
        batch: &PlannedBatch,
        sources: u32,
        options: &PipelineOptions,
        manifest: &Mutex<JobManifest>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let outcome = merge_shards(&batch.inputs, &batch.output, None, options, cancel)?;
        debug!(
            "Job {} {}: {} records in, {} out",
            self.job_id, batch.id, outcome.records_read, outcome.records_written
        );

        {
            let mut manifest = manifest.lock();
            manifest.mark_completed(batch.id, sources);
            manifest.save(&plan.work_dir)?;
        }

        if !self.config.keep_intermediates {
            for input in batch.inputs.iter().filter(|p| plan.is_intermediate(p)) {
                if let Err(e) = std::fs::remove_file(input) {
                    warn!("Could not remove intermediate {}: {e}", input.display());
                }
            }
        }
        Ok(outcome)
    }

    fn transition(&self, next: JobState) {
        let mut state = self.state.lock();
        debug_assert!(
            state.can_transition_to(&next),
            "invalid transition {state} -> {next}"
        );
        info!("Job {}: {next}", self.job_id);
        *state = next;
    }
}

/// The failure that caused a level to stop: siblings that were only
/// cancelled because of it are not the root cause.
fn first_failure(failures: Vec<StagedError>) -> Option<StagedError> {
    let mut cancelled = None;
    for failure in failures {
        if failure.1.kind() != ErrorKind::Cancelled {
            return Some(failure);
        }
        cancelled.get_or_insert(failure);
    }
    cancelled
}

/// Remove writer temp files left behind by a killed process.
///
/// With `target`, only temp files belonging to that destination name are
/// touched.
fn remove_stale_temp_files(dir: &Path, target: Option<&std::ffi::OsStr>) {
    let prefix = target.map(|name| format!(".{}.", name.to_string_lossy()));
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let stale = name.starts_with('.')
            && name.ends_with(".tmp")
            && prefix.as_ref().is_none_or(|prefix| name.starts_with(prefix.as_str()));
        if stale {
            warn!("Removing stale temporary file {}", entry.path().display());
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!("Could not remove {}: {e}", entry.path().display());
            }
        }
    }
}
