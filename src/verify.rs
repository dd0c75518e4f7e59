//! Shard inspection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardsumError};
use crate::record::{Count, Key};
use crate::shard::{Compression, KeyOrder, ShardReader};

/// Summary of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub path: PathBuf,
    pub compression: Compression,
    pub records: u64,
    pub distinct_keys: u64,
    pub total_count: Count,
    pub first_key: Option<Key>,
    pub last_key: Option<Key>,
}

/// Read a shard end to end, checking its format and key order.
///
/// Fails with the same errors a merge of this shard would report.
pub fn verify_shard<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<ShardStats> {
    let path = path.as_ref();
    let mut reader = ShardReader::open(path, order)?;

    let mut stats = ShardStats {
        path: path.to_path_buf(),
        compression: Compression::from_path(path),
        records: 0,
        distinct_keys: 0,
        total_count: 0,
        first_key: None,
        last_key: None,
    };

    while let Some(record) = reader.advance()? {
        stats.records += 1;
        stats.total_count = stats.total_count.checked_add(record.count).ok_or_else(|| {
            ShardsumError::AggregationOverflow {
                key: record.key.clone(),
                accumulated: stats.total_count,
                incoming: record.count,
            }
        })?;
        if stats.last_key.as_ref() != Some(&record.key) {
            stats.distinct_keys += 1;
        }
        if stats.first_key.is_none() {
            stats.first_key = Some(record.key.clone());
        }
        stats.last_key = Some(record.key);
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_verify_plain_shard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.tsv");
        std::fs::write(&path, "0\tA\t1\n0\tA\t2\n0\tB\t3\n4\tA\t4\n").unwrap();

        let stats = verify_shard(&path, KeyOrder::NonDecreasing).unwrap();
        assert_eq!(stats.compression, Compression::None);
        assert_eq!(stats.records, 4);
        assert_eq!(stats.distinct_keys, 3);
        assert_eq!(stats.total_count, 10);
        assert_eq!(stats.first_key, Some(Key::new(0, "A")));
        assert_eq!(stats.last_key, Some(Key::new(4, "A")));

        let err = verify_shard(&path, KeyOrder::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShardOrderViolation);
    }

    #[test]
    fn test_verify_empty_shard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tsv");
        std::fs::write(&path, "").unwrap();
        let stats = verify_shard(&path, KeyOrder::Strict).unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.first_key, None);
    }

    #[test]
    fn test_verify_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "0\tA\t1\n0\tB\n").unwrap();
        let err = verify_shard(&path, KeyOrder::NonDecreasing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShardCorrupt);

        let missing = verify_shard(dir.path().join("missing.tsv.gz"), KeyOrder::NonDecreasing);
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::ShardCorrupt);
    }

    #[test]
    fn test_total_overflow() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.tsv");
        std::fs::write(&path, format!("0\tA\t{}\n0\tB\t1\n", u64::MAX)).unwrap();
        let err = verify_shard(&path, KeyOrder::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AggregationOverflow);
    }
}
