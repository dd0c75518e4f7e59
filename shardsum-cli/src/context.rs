use anyhow::{Context, Result, bail};
use shardsum::JobConfig;

use crate::cli::MergeCommand;

/// Build the job configuration: the `--config` file if given, then
/// command-line overrides.
pub fn job_config(cmd: &MergeCommand) -> Result<JobConfig> {
    let mut config = match &cmd.config {
        Some(path) => JobConfig::from_file(path)
            .with_context(|| format!("Failed to load job configuration {}", path.display()))?,
        None => {
            let Some(output) = &cmd.output else {
                bail!("No output given. Pass --output or a --config file with output_path.");
            };
            JobConfig::new(output)
        }
    };

    if let Some(output) = &cmd.output {
        config.output_path = output.clone();
    }
    config.input_shards.extend(cmd.inputs.iter().cloned());
    if let Some(dir) = &cmd.input_dir {
        config.input_dir = Some(dir.clone());
    }
    if let Some(batch_width) = cmd.batch_width {
        config.batch_width = batch_width;
    }
    if let Some(parallelism) = cmd.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(tmp_dir) = &cmd.tmp_dir {
        config.tmp_dir = tmp_dir.clone();
    }
    if let Some(job_id) = &cmd.job_id {
        config.job_id = Some(job_id.clone());
    }
    if let Some(level) = cmd.compression_level {
        config.compression_level = level;
    }
    if cmd.strict {
        config.strict_keys = true;
    }
    if let Some(filter) = &cmd.key_filter {
        config.key_filter = Some(filter.clone());
    }
    if cmd.keep_intermediates {
        config.keep_intermediates = true;
    }

    if config.input_shards.is_empty() && config.input_dir.is_none() {
        bail!("No inputs given. Pass --input or --input-dir.");
    }
    config.validate()?;
    Ok(config)
}
