use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

/// Shardsum - merge sorted count shards
#[derive(Parser)]
#[command(name = "shardsum", version = shardsum::VERSION, about)]
pub struct Cli {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    /// Log batch-level progress.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Merge shards into one output, summing counts of equal keys.
    Merge(MergeCommand),
    /// Check that shards are well-formed and sorted.
    Verify(VerifyCommand),
}

// --- Merge ---

#[derive(Args)]
pub struct MergeCommand {
    /// Job configuration file (TOML, or JSON with a `.json` extension).
    /// Command-line options override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Input shard. May be repeated; order is preserved.
    #[arg(short, long = "input", value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Directory of input shards, read in file name order after `--input`.
    #[arg(long, value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Output shard. A `.gz` name is written gzip-compressed.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum shards merged in one pass.
    #[arg(long, env = "SHARDSUM_BATCH_WIDTH")]
    pub batch_width: Option<usize>,

    /// Batches merged concurrently.
    #[arg(short = 'j', long, env = "SHARDSUM_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Parent directory for intermediate shards.
    #[arg(long, env = "SHARDSUM_TMP_DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Job id. Rerunning with the id of a failed job resumes it.
    #[arg(long)]
    pub job_id: Option<String>,

    /// Gzip level (0-9).
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Reject repeated keys within one shard.
    #[arg(long)]
    pub strict: bool,

    /// Sorted `namespace<TAB>title` list; only listed keys are written.
    #[arg(long, value_name = "PATH")]
    pub key_filter: Option<PathBuf>,

    /// Keep intermediate shards and the job manifest after success.
    #[arg(long)]
    pub keep_intermediates: bool,

    /// Print the merge plan without reading or writing any shard.
    #[arg(long)]
    pub dry_run: bool,
}

// --- Verify ---

#[derive(Args)]
pub struct VerifyCommand {
    /// Shards to check.
    #[arg(required = true)]
    pub shards: Vec<PathBuf>,

    /// Reject repeated keys within one shard.
    #[arg(long)]
    pub strict: bool,
}
