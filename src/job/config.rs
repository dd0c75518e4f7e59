//! Job configuration: builder, file loading and input resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::CombineOp;
use crate::error::{Result, ShardsumError};
use crate::pipeline::PipelineOptions;
use crate::shard::{DEFAULT_COMPRESSION_LEVEL, KeyOrder};

/// Default number of shards merged in one batch.
pub const DEFAULT_BATCH_WIDTH: usize = 100;

/// Configuration for one merge job.
///
/// Loadable from TOML or JSON; every field except `output_path` has a
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Shards to merge, in arrival order.
    #[serde(default)]
    pub input_shards: Vec<PathBuf>,

    /// Directory whose files are appended to `input_shards` in name order.
    #[serde(default)]
    pub input_dir: Option<PathBuf>,

    /// Final output path. `.gz` selects gzip.
    pub output_path: PathBuf,

    /// Maximum number of shards merged in one pass.
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,

    /// Number of batches merged concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Parent directory of the per-job work directory.
    #[serde(default = "std::env::temp_dir")]
    pub tmp_dir: PathBuf,

    /// Job identifier. Reusing an id resumes that job's completed batches.
    #[serde(default)]
    pub job_id: Option<String>,

    /// Gzip level (0-9) for intermediate and final shards.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Reject repeated keys inside one shard.
    #[serde(default)]
    pub strict_keys: bool,

    /// How counts of equal keys are combined.
    #[serde(default)]
    pub combine: CombineOp,

    /// Sorted key list; only listed keys reach the final output.
    #[serde(default)]
    pub key_filter: Option<PathBuf>,

    /// Keep the work directory after the job finishes.
    #[serde(default)]
    pub keep_intermediates: bool,
}

fn default_batch_width() -> usize {
    DEFAULT_BATCH_WIDTH
}

fn default_parallelism() -> usize {
    num_cpus::get().max(1)
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl JobConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        JobConfig {
            input_shards: Vec::new(),
            input_dir: None,
            output_path: output_path.into(),
            batch_width: default_batch_width(),
            parallelism: default_parallelism(),
            tmp_dir: std::env::temp_dir(),
            job_id: None,
            compression_level: default_compression_level(),
            strict_keys: false,
            combine: CombineOp::Sum,
            key_filter: None,
            keep_intermediates: false,
        }
    }

    pub fn builder(output_path: impl Into<PathBuf>) -> JobConfigBuilder {
        JobConfigBuilder {
            config: JobConfig::new(output_path),
        }
    }

    /// Load a configuration file (TOML, or JSON when the name ends in `.json`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&text)?)
        } else {
            toml::from_str(&text).map_err(|e| {
                ShardsumError::invalid_config(format!("{}: {e}", path.display()))
            })
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.batch_width < 2 {
            return Err(ShardsumError::invalid_config(format!(
                "batch_width must be at least 2, got {}",
                self.batch_width
            )));
        }
        if self.parallelism == 0 {
            return Err(ShardsumError::invalid_config("parallelism must be at least 1"));
        }
        if self.compression_level > 9 {
            return Err(ShardsumError::invalid_config(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ShardsumError::invalid_config("output_path is empty"));
        }
        if let Some(job_id) = &self.job_id {
            let valid = !job_id.is_empty()
                && job_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ShardsumError::invalid_config(format!(
                    "job_id {job_id:?} may only contain ASCII letters, digits, '-' and '_'"
                )));
            }
        }
        Ok(())
    }

    /// The full, ordered input list: `input_shards` followed by the files of
    /// `input_dir` sorted by name.
    ///
    /// The output path and key filter are never treated as inputs.
    pub fn resolve_inputs(&self) -> Result<Vec<PathBuf>> {
        let mut inputs = self.input_shards.clone();

        if let Some(dir) = &self.input_dir {
            let mut listed = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let path = entry.path();
                let hidden = path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with('.'));
                if hidden || path == self.output_path || Some(&path) == self.key_filter.as_ref() {
                    continue;
                }
                listed.push(path);
            }
            listed.sort();
            inputs.extend(listed);
        }

        Ok(inputs)
    }

    /// Per-batch pipeline settings derived from this config.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            order: KeyOrder::from_strict(self.strict_keys),
            combine: self.combine,
            compression_level: self.compression_level,
        }
    }
}

/// Builder for [`JobConfig`].
#[derive(Debug, Clone)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.input_shards.push(path.into());
        self
    }

    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config
            .input_shards
            .extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = Some(dir.into());
        self
    }

    pub fn batch_width(mut self, batch_width: usize) -> Self {
        self.config.batch_width = batch_width;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    pub fn tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tmp_dir = dir.into();
        self
    }

    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.config.job_id = Some(job_id.into());
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level;
        self
    }

    pub fn strict_keys(mut self, strict: bool) -> Self {
        self.config.strict_keys = strict;
        self
    }

    pub fn combine(mut self, op: CombineOp) -> Self {
        self.config.combine = op;
        self
    }

    pub fn key_filter(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.key_filter = Some(path.into());
        self
    }

    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.config.keep_intermediates = keep;
        self
    }

    pub fn build(self) -> JobConfig {
        self.config
    }
}
