//! Leveled batch planning.
//!
//! Inputs are cut into batches of at most `batch_width` shards. Each batch
//! becomes one intermediate shard in the job's work directory, and the
//! intermediates form the input of the next level. Levels continue while more
//! than `batch_width` shards remain; the survivors then go through a single
//! final merge into the output path. A trailing batch of one shard is carried
//! to the next level unchanged instead of being copied.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifies one batch within a job. The final merge has
/// `level == levels.len()` and `index == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId {
    pub level: u32,
    pub index: u32,
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} batch {}", self.level, self.index)
    }
}

/// One merge: its inputs and the shard it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedBatch {
    pub id: BatchId,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

/// All batches of one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLevel {
    pub level: u32,
    pub batches: Vec<PlannedBatch>,
    /// Shards passed to the next level without a merge.
    pub carried: Vec<PathBuf>,
}

/// The complete merge tree of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub batch_width: usize,
    pub input_count: usize,
    pub work_dir: PathBuf,
    pub levels: Vec<PlannedLevel>,
    pub final_merge: PlannedBatch,
}

/// File name of an intermediate shard.
pub fn intermediate_name(id: BatchId) -> String {
    format!("level-{:03}-batch-{:06}.tsv.gz", id.level, id.index)
}

impl MergePlan {
    /// Plan the merge of `inputs`. `batch_width` must be at least 2.
    pub fn build(inputs: &[PathBuf], batch_width: usize, work_dir: &Path, output: &Path) -> Self {
        assert!(batch_width >= 2, "batch_width must be at least 2");

        let mut levels = Vec::new();
        let mut current = inputs.to_vec();

        while current.len() > batch_width {
            let level = levels.len() as u32;
            let mut next = Vec::with_capacity(current.len().div_ceil(batch_width));
            let mut batches = Vec::new();
            let mut carried = Vec::new();

            for (index, chunk) in current.chunks(batch_width).enumerate() {
                if let [single] = chunk {
                    carried.push(single.clone());
                    next.push(single.clone());
                    continue;
                }
                let id = BatchId {
                    level,
                    index: index as u32,
                };
                let output = work_dir.join(intermediate_name(id));
                next.push(output.clone());
                batches.push(PlannedBatch {
                    id,
                    inputs: chunk.to_vec(),
                    output,
                });
            }

            levels.push(PlannedLevel {
                level,
                batches,
                carried,
            });
            current = next;
        }

        let final_merge = PlannedBatch {
            id: BatchId {
                level: levels.len() as u32,
                index: 0,
            },
            inputs: current,
            output: output.to_path_buf(),
        };

        MergePlan {
            batch_width,
            input_count: inputs.len(),
            work_dir: work_dir.to_path_buf(),
            levels,
            final_merge,
        }
    }

    /// Number of passes over the data, including the final merge.
    pub fn passes(&self) -> usize {
        self.levels.len() + 1
    }

    /// Number of merges, including the final merge.
    pub fn total_batches(&self) -> usize {
        self.levels.iter().map(|l| l.batches.len()).sum::<usize>() + 1
    }

    /// Every batch in execution order, ending with the final merge.
    pub fn batches(&self) -> impl Iterator<Item = &PlannedBatch> {
        self.levels
            .iter()
            .flat_map(|level| level.batches.iter())
            .chain(std::iter::once(&self.final_merge))
    }

    /// Map from each shard path to the batch that consumes it.
    pub fn consumers(&self) -> HashMap<&Path, BatchId> {
        let mut consumers = HashMap::new();
        for batch in self.batches() {
            for input in &batch.inputs {
                consumers.insert(input.as_path(), batch.id);
            }
        }
        consumers
    }

    /// Whether `path` is an intermediate shard owned by this job.
    pub fn is_intermediate(&self, path: &Path) -> bool {
        path.starts_with(&self.work_dir)
    }
}
