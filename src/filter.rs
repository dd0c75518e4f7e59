//! Streaming semi-join against a sorted key list.

use crate::error::Result;
use crate::record::Record;
use crate::shard::ShardReader;

/// Keeps only records whose key appears in a sorted key list.
///
/// Both the record stream and the key list are consumed in one forward pass,
/// so the key list is never loaded into memory. The record stream must be
/// strictly increasing by key, as produced by
/// [`GroupingAggregator`](crate::aggregate::GroupingAggregator).
pub struct KeyFilter<I> {
    input: I,
    keys: ShardReader,
    dropped: u64,
}

impl<I> KeyFilter<I>
where
    I: Iterator<Item = Result<Record>>,
{
    pub fn new(input: I, keys: ShardReader) -> Self {
        KeyFilter {
            input,
            keys,
            dropped: 0,
        }
    }

    /// Number of records filtered out so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn step(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.input.next().transpose()? {
            while self
                .keys
                .peek()
                .is_some_and(|allowed| allowed.key < record.key)
            {
                self.keys.advance()?;
            }

            if self
                .keys
                .peek()
                .is_some_and(|allowed| allowed.key == record.key)
            {
                return Ok(Some(record));
            }
            self.dropped += 1;
        }
        Ok(None)
    }
}

impl<I> Iterator for KeyFilter<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}
