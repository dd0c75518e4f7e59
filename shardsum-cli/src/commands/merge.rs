use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use shardsum::{FailureReason, JobState, MergeJob};

use crate::cli::MergeCommand;
use crate::context;
use crate::output::{self, OutputFormat};

/// Execute a merge command.
pub async fn run(cmd: MergeCommand, format: OutputFormat) -> Result<()> {
    let config = context::job_config(&cmd)?;
    let job = MergeJob::new(config)?;

    if cmd.dry_run {
        let plan = job.plan()?;
        return output::print_plan(&plan, format);
    }

    let settings = job.config();
    info!(
        "Job {}: {} threads, batch width {}, work directory {}",
        job.job_id(),
        settings.parallelism,
        settings.batch_width,
        job.work_dir().display()
    );

    // Ctrl-C cancels the job; batches stop at their next check and remove
    // their temporary files.
    let token = job.cancellation_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling merge");
            token.cancel();
        }
    });

    let job = Arc::new(job);
    let runner = Arc::clone(&job);
    let result = tokio::task::spawn_blocking(move || runner.run())
        .await
        .context("Merge task panicked")?;
    signal.abort();

    match result {
        Ok(report) => output::print_report(&report, format),
        Err(err) => {
            if let JobState::Failed(reason) = job.state() {
                eprintln!("{}", failure_line(&reason));
            }
            if err.is_retryable() {
                eprintln!("Rerun with --job-id {} to resume.", job.job_id());
            } else {
                eprintln!(
                    "Completed batches were kept. Fix the input and rerun with --job-id {} to resume.",
                    job.job_id()
                );
            }
            Err(err.into())
        }
    }
}

/// One-line summary of a failed job: stage, error kind and message, plus the
/// offending shard when there is one.
fn failure_line(reason: &FailureReason) -> String {
    match &reason.shard {
        Some(shard) => format!("Job {reason} (shard {})", shard.display()),
        None => format!("Job {reason}"),
    }
}
