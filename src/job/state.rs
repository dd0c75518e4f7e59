//! Job lifecycle.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ShardsumError};
use crate::job::plan::BatchId;

/// Where in the job a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Batch(BatchId),
    FinalMerge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Planning => f.write_str("planning"),
            Stage::Batch(id) => write!(f, "{id}"),
            Stage::FinalMerge => f.write_str("final merge"),
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub shard: Option<PathBuf>,
    pub message: String,
}

impl FailureReason {
    pub fn new(stage: Stage, error: &ShardsumError) -> Self {
        FailureReason {
            stage,
            kind: error.kind(),
            shard: error.shard().map(|p| p.to_path_buf()),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with {}: {}", self.stage, self.kind, self.message)
    }
}

/// State of a merge job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    BatchingLevel(u32),
    FinalMerge,
    Done,
    Failed(FailureReason),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (current, Failed(_)) => !current.is_terminal(),
            (Pending, BatchingLevel(0)) | (Pending, FinalMerge) => true,
            (BatchingLevel(k), BatchingLevel(n)) => *n == k + 1,
            (BatchingLevel(_), FinalMerge) => true,
            (FinalMerge, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => f.write_str("pending"),
            JobState::BatchingLevel(level) => write!(f, "batching level {level}"),
            JobState::FinalMerge => f.write_str("final merge"),
            JobState::Done => f.write_str("done"),
            JobState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
