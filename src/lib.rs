//! # Shardsum
//!
//! External k-way merge and aggregation of sorted count shards.
//!
//! ## Features
//!
//! - Streaming merge of gzip or plain TSV shards sorted by `(namespace, title)`
//! - Equal keys combined with overflow-checked sums
//! - Leveled batching with a bounded number of open files per merge
//! - Atomic output: nothing appears at the destination until a merge succeeds
//! - Parallel batches, cooperative cancellation and resumable jobs
//! - Optional semi-join against a sorted key list
// Core modules
pub mod aggregate;
pub mod cancel;
pub mod error;
pub mod filter;
pub mod job;
pub mod merge;
pub mod pipeline;
pub mod record;
pub mod shard;
pub mod verify;

// Re-exports for the public API
pub use aggregate::{CombineOp, GroupingAggregator};
pub use cancel::CancellationToken;
pub use error::{ErrorKind, Result, ShardsumError};
pub use filter::KeyFilter;
pub use job::{
    BatchId, FailureReason, JobConfig, JobConfigBuilder, JobReport, JobState, MergeJob, MergePlan,
    Stage,
};
pub use merge::KWayMerge;
pub use pipeline::{BatchOutcome, PipelineOptions, merge_shards};
pub use record::{Count, Key, Namespace, Record};
pub use shard::{Compression, KeyOrder, ShardReader, ShardWriter, WrittenShard};
pub use verify::{ShardStats, verify_shard};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
