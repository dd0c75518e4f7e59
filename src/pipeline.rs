//! The per-batch merge pipeline.
//!
//! ```text
//! ShardReader x N ─► KWayMerge ─► GroupingAggregator ─► [KeyFilter] ─► ShardWriter
//! ```
//!
//! One batch runs single-threaded from start to finish. The output is
//! renamed into place only after every input has been fully consumed without
//! error; on any error or cancellation the temporary output is removed.

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::aggregate::{CombineOp, GroupingAggregator};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::filter::KeyFilter;
use crate::merge::KWayMerge;
use crate::record::Record;
use crate::shard::{DEFAULT_COMPRESSION_LEVEL, KeyOrder, ShardReader, ShardWriter};

/// Records processed between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Settings shared by every batch of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub order: KeyOrder,
    pub combine: CombineOp,
    pub compression_level: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            order: KeyOrder::NonDecreasing,
            combine: CombineOp::Sum,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Counters for one completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub output: PathBuf,
    pub inputs: usize,
    pub records_read: u64,
    pub records_written: u64,
    pub records_filtered: u64,
}

/// Merge `inputs` into `output`.
///
/// When `key_filter` is given, only keys listed in it are written.
pub fn merge_shards(
    inputs: &[PathBuf],
    output: &Path,
    key_filter: Option<&Path>,
    options: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<BatchOutcome> {
    cancel.check()?;

    let readers = inputs
        .iter()
        .map(|path| ShardReader::open(path, options.order))
        .collect::<Result<Vec<_>>>()?;
    let mut merge = KWayMerge::new(readers);
    let mut writer = ShardWriter::create(output, options.compression_level)?;
    debug!(
        "merging {} shards into {}",
        merge.fan_in(),
        writer.dest().display()
    );

    let records_filtered = {
        let grouped = Cancellable::new(
            GroupingAggregator::new(merge.by_ref(), options.combine),
            cancel,
        );
        match key_filter {
            Some(path) => {
                let keys = ShardReader::open_key_list(path, options.order)?;
                let mut filtered = KeyFilter::new(grouped, keys);
                drain(filtered.by_ref(), &mut writer, cancel)?;
                filtered.dropped()
            }
            None => {
                drain(grouped, &mut writer, cancel)?;
                0
            }
        }
    };

    let records_read = merge.emitted();
    let written = writer.commit()?;
    debug!(
        "merged {} shards into {} ({} records in, {} out)",
        inputs.len(),
        written.path.display(),
        records_read,
        written.records
    );

    Ok(BatchOutcome {
        output: written.path,
        inputs: inputs.len(),
        records_read,
        records_written: written.records,
        records_filtered,
    })
}

fn drain<I>(records: I, writer: &mut ShardWriter, cancel: &CancellationToken) -> Result<()>
where
    I: Iterator<Item = Result<Record>>,
{
    for record in records {
        writer.write(&record?)?;
    }
    cancel.check()
}

/// Polls the cancellation token every [`CANCEL_CHECK_INTERVAL`] grouped
/// records, ahead of the key filter, so records the filter drops count
/// toward the interval too.
struct Cancellable<'a, I> {
    input: I,
    cancel: &'a CancellationToken,
    seen: u64,
    cancelled: bool,
}

impl<'a, I> Cancellable<'a, I> {
    fn new(input: I, cancel: &'a CancellationToken) -> Self {
        Cancellable {
            input,
            cancel,
            seen: 0,
            cancelled: false,
        }
    }
}

impl<I> Iterator for Cancellable<'_, I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancelled {
            return None;
        }
        if self.seen % CANCEL_CHECK_INTERVAL == 0 {
            if let Err(err) = self.cancel.check() {
                self.cancelled = true;
                return Some(Err(err));
            }
        }
        self.seen += 1;
        self.input.next()
    }
}
