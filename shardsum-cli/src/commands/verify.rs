use anyhow::Result;
use log::error;
use shardsum::{KeyOrder, verify_shard};

use crate::cli::VerifyCommand;
use crate::output::{self, OutputFormat};

/// Execute a verify command.
///
/// Every shard is checked; the first failure decides the exit status.
pub fn run(cmd: VerifyCommand, format: OutputFormat) -> Result<()> {
    let order = KeyOrder::from_strict(cmd.strict);
    let mut stats = Vec::with_capacity(cmd.shards.len());
    let mut first_error = None;

    for shard in &cmd.shards {
        match verify_shard(shard, order) {
            Ok(s) => stats.push(s),
            Err(e) => {
                error!("{e}");
                first_error.get_or_insert(e);
            }
        }
    }

    output::print_stats(&stats, format)?;
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
