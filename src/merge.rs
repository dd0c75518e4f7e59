//! K-way merge of sorted record streams.
//!
//! [`KWayMerge`] keeps one head record per non-exhausted source in a binary
//! heap. Each step pops the smallest head, pulls the next record from that
//! source and pushes it back, so memory is bounded by the number of sources
//! rather than by the data volume.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::record::Record;

struct HeapEntry {
    record: Record,
    /// Index into `sources`.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.key == other.record.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry: smaller keys must compare
        // greater, and on equal keys the earlier source wins.
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges individually sorted sources into one non-decreasing stream.
///
/// Records with equal keys from different sources are emitted in source
/// order. Equal keys are not combined here; see
/// [`GroupingAggregator`](crate::aggregate::GroupingAggregator).
///
/// The first error from any source ends the stream.
pub struct KWayMerge<S> {
    sources: Vec<S>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
    failed: bool,
    emitted: u64,
}

impl<S> KWayMerge<S>
where
    S: Iterator<Item = Result<Record>>,
{
    pub fn new(sources: Vec<S>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        KWayMerge {
            sources,
            heap,
            primed: false,
            failed: false,
            emitted: 0,
        }
    }

    /// Number of sources being merged.
    pub fn fan_in(&self) -> usize {
        self.sources.len()
    }

    /// Number of records emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn pull(&mut self, source: usize) -> Result<()> {
        if let Some(record) = self.sources[source].next().transpose()? {
            self.heap.push(HeapEntry { record, source });
        }
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        for source in 0..self.sources.len() {
            self.pull(source)?;
        }
        self.primed = true;
        Ok(())
    }

    /// The next record in merged order.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if !self.primed {
            self.prime()?;
        }
        let Some(HeapEntry { record, source }) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(source)?;
        self.emitted += 1;
        Ok(Some(record))
    }
}

impl<S> Iterator for KWayMerge<S>
where
    S: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                self.heap.clear();
                Some(Err(e))
            }
        }
    }
}
