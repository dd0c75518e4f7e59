//! Grouping aggregation over an ordered record stream.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardsumError};
use crate::record::{Count, Record};

/// Associative, commutative combine applied to the counts of equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    /// Checked addition; overflow is an error.
    #[default]
    Sum,
    Max,
    Min,
}

impl CombineOp {
    /// Combine two counts, or `None` if the result is not representable.
    pub fn combine(self, accumulated: Count, incoming: Count) -> Option<Count> {
        match self {
            CombineOp::Sum => accumulated.checked_add(incoming),
            CombineOp::Max => Some(accumulated.max(incoming)),
            CombineOp::Min => Some(accumulated.min(incoming)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CombineOp::Sum => "sum",
            CombineOp::Max => "max",
            CombineOp::Min => "min",
        }
    }
}

/// Collapses runs of equal keys into one record.
///
/// The input must be in non-decreasing key order (the output of
/// [`KWayMerge`](crate::merge::KWayMerge)). Only the currently open group is
/// held: the first record of a new key flushes the previous group, so the
/// output is strictly increasing by key and memory does not grow with the
/// input.
pub struct GroupingAggregator<I> {
    input: I,
    op: CombineOp,
    open: Option<Record>,
    done: bool,
}

impl<I> GroupingAggregator<I>
where
    I: Iterator<Item = Result<Record>>,
{
    pub fn new(input: I, op: CombineOp) -> Self {
        GroupingAggregator {
            input,
            op,
            open: None,
            done: false,
        }
    }

    fn step(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.input.next().transpose()? {
            let Some(open) = self.open.as_mut() else {
                self.open = Some(record);
                continue;
            };

            if open.key == record.key {
                open.count = self.op.combine(open.count, record.count).ok_or_else(|| {
                    ShardsumError::AggregationOverflow {
                        key: record.key,
                        accumulated: open.count,
                        incoming: record.count,
                    }
                })?;
            } else {
                return Ok(self.open.replace(record));
            }
        }
        Ok(self.open.take())
    }
}

impl<I> Iterator for GroupingAggregator<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.open = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::record::Key;

    fn stream(records: &[(i64, &str, u64)]) -> impl Iterator<Item = Result<Record>> {
        records
            .iter()
            .map(|&(ns, title, count)| Ok(Record::new(ns, title, count)))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_sums_runs() {
        let grouped: Vec<_> = GroupingAggregator::new(
            stream(&[
                (0, "Cat", 3),
                (0, "Cat", 2),
                (0, "Dog", 1),
                (1, "Cat", 5),
            ]),
            CombineOp::Sum,
        )
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(
            grouped,
            vec![
                Record::new(0, "Cat", 5),
                Record::new(0, "Dog", 1),
                Record::new(1, "Cat", 5),
            ]
        );
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(GroupingAggregator::new(stream(&[]), CombineOp::Sum).count(), 0);

        let grouped: Vec<_> = GroupingAggregator::new(stream(&[(3, "X", 7)]), CombineOp::Sum)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(grouped, vec![Record::new(3, "X", 7)]);
    }

    #[test]
    fn test_overflow_is_fatal() {
        let results: Vec<_> = GroupingAggregator::new(
            stream(&[(0, "A", 1), (0, "Big", u64::MAX - 1), (0, "Big", 2)]),
            CombineOp::Sum,
        )
        .collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &Record::new(0, "A", 1));
        match &results[1] {
            Err(ShardsumError::AggregationOverflow {
                key,
                accumulated,
                incoming,
            }) => {
                assert_eq!(key, &Key::new(0, "Big"));
                assert_eq!(*accumulated, u64::MAX - 1);
                assert_eq!(*incoming, 2);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn test_sum_up_to_max_is_fine() {
        let grouped: Vec<_> = GroupingAggregator::new(
            stream(&[(0, "Big", u64::MAX - 1), (0, "Big", 1)]),
            CombineOp::Sum,
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(grouped[0].count, u64::MAX);
    }

    #[test]
    fn test_max_and_min() {
        let input = [(0, "A", 4), (0, "A", 9), (0, "A", 2)];
        let max: Vec<_> = GroupingAggregator::new(stream(&input), CombineOp::Max)
            .collect::<Result<_>>()
            .unwrap();
        let min: Vec<_> = GroupingAggregator::new(stream(&input), CombineOp::Min)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(max[0].count, 9);
        assert_eq!(min[0].count, 2);
    }

    #[test]
    fn test_upstream_error_passes_through() {
        let input = vec![
            Ok(Record::new(0, "A", 1)),
            Err(ShardsumError::corrupt("x.gz", 9, "invalid count")),
        ];
        let results: Vec<_> = GroupingAggregator::new(input.into_iter(), CombineOp::Sum).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            ErrorKind::ShardCorrupt
        );
    }
}
