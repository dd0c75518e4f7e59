//! Error types for shard merging.
//!
//! Every failure the engine can report is a [`ShardsumError`]. Each variant maps
//! onto an [`ErrorKind`], which is what job failure reports and the CLI exit
//! code are keyed on.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Count, Key};

/// The main error type for shardsum operations.
#[derive(Debug, Error)]
pub enum ShardsumError {
    /// A shard could not be opened, decompressed or parsed.
    #[error("corrupt shard {shard} at line {line}: {reason}", shard = .shard.display())]
    ShardCorrupt {
        shard: PathBuf,
        line: u64,
        reason: String,
    },

    /// A shard yielded a key smaller than its predecessor.
    #[error(
        "order violation in shard {shard} at line {line}: {current} follows {previous}",
        shard = .shard.display()
    )]
    ShardOrderViolation {
        shard: PathBuf,
        line: u64,
        previous: Key,
        current: Key,
    },

    /// Combining a group's values exceeded the count range.
    #[error("count overflow for key {key}: {accumulated} + {incoming}")]
    AggregationOverflow {
        key: Key,
        accumulated: Count,
        incoming: Count,
    },

    /// Writing, flushing or renaming an output shard failed.
    #[error("failed to write shard {path}: {source}", path = .path.display())]
    WriterFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job was cancelled before it finished.
    #[error("merge cancelled")]
    Cancelled,

    /// Invalid job configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The job manifest is unreadable or belongs to a different job.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// I/O outside of shard reading and writing (work directories, listings).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ShardsumError {
    /// Create a corrupt-shard error.
    pub fn corrupt<P: AsRef<Path>, S: Into<String>>(shard: P, line: u64, reason: S) -> Self {
        ShardsumError::ShardCorrupt {
            shard: shard.as_ref().to_path_buf(),
            line,
            reason: reason.into(),
        }
    }

    /// Create a writer failure for the given destination.
    pub fn writer<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        ShardsumError::WriterFailure {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        ShardsumError::InvalidConfig(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        ShardsumError::Manifest(msg.into())
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShardsumError::ShardCorrupt { .. } => ErrorKind::ShardCorrupt,
            ShardsumError::ShardOrderViolation { .. } => ErrorKind::ShardOrderViolation,
            ShardsumError::AggregationOverflow { .. } => ErrorKind::AggregationOverflow,
            ShardsumError::WriterFailure { .. } => ErrorKind::WriterFailure,
            ShardsumError::Cancelled => ErrorKind::Cancelled,
            ShardsumError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ShardsumError::Manifest(_) => ErrorKind::Manifest,
            ShardsumError::Io(_) | ShardsumError::Json(_) => ErrorKind::Io,
        }
    }

    /// The shard or output file the error is about, if any.
    pub fn shard(&self) -> Option<&Path> {
        match self {
            ShardsumError::ShardCorrupt { shard, .. }
            | ShardsumError::ShardOrderViolation { shard, .. } => Some(shard),
            ShardsumError::WriterFailure { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Whether re-running the failed batch can succeed without operator
    /// intervention on the data itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::WriterFailure | ErrorKind::Cancelled | ErrorKind::Io
        )
    }
}

/// Coarse error category, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ShardCorrupt,
    ShardOrderViolation,
    AggregationOverflow,
    WriterFailure,
    Cancelled,
    InvalidConfig,
    Manifest,
    Io,
}

impl ErrorKind {
    /// Process exit code used by the command-line tool.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::ShardCorrupt => 2,
            ErrorKind::ShardOrderViolation => 3,
            ErrorKind::AggregationOverflow => 4,
            ErrorKind::WriterFailure => 5,
            ErrorKind::InvalidConfig | ErrorKind::Manifest => 6,
            ErrorKind::Io => 7,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ShardCorrupt => "ShardCorrupt",
            ErrorKind::ShardOrderViolation => "ShardOrderViolation",
            ErrorKind::AggregationOverflow => "AggregationOverflow",
            ErrorKind::WriterFailure => "WriterFailure",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::Manifest => "Manifest",
            ErrorKind::Io => "Io",
        };
        f.write_str(name)
    }
}

/// Result type alias for shardsum operations.
pub type Result<T> = std::result::Result<T, ShardsumError>;
