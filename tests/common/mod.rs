#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shardsum::{Key, KeyOrder, Record, ShardReader, ShardWriter};

/// Write `records` (already sorted) to `path`.
pub fn write_shard(path: &Path, records: &[Record]) -> PathBuf {
    let mut writer = ShardWriter::create(path, 6).unwrap();
    for record in records {
        writer.write(record).unwrap();
    }
    writer.commit().unwrap().path
}

pub fn read_shard(path: &Path) -> Vec<Record> {
    ShardReader::open(path, KeyOrder::Strict)
        .unwrap()
        .collect::<shardsum::Result<_>>()
        .unwrap()
}

/// `n` random sorted, duplicate-free shards over a small key space, so keys
/// overlap across shards. Returns the shard paths and the expected sums.
pub fn random_shards(
    dir: &Path,
    n: usize,
    seed: u64,
) -> (Vec<PathBuf>, BTreeMap<Key, u64>) {
    let titles = ["Apple", "Cat", "Dog", "Zebra", "apple", "Éclair", "Main_Page", "Ω"];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut expected = BTreeMap::new();
    let mut paths = Vec::with_capacity(n);

    for i in 0..n {
        let mut shard = BTreeMap::new();
        let len = rng.random_range(0..20);
        for _ in 0..len {
            let namespace = rng.random_range(-1..4);
            let title = titles[rng.random_range(0..titles.len())];
            let count = rng.random_range(1..1000u64);
            shard.insert(Key::new(namespace, title), count);
        }
        for (key, count) in &shard {
            *expected.entry(key.clone()).or_insert(0) += count;
        }
        let records: Vec<Record> = shard
            .into_iter()
            .map(|(key, count)| Record { key, count })
            .collect();
        let name = if i % 3 == 0 {
            format!("shard-{i:04}.tsv")
        } else {
            format!("shard-{i:04}.tsv.gz")
        };
        paths.push(write_shard(&dir.join(name), &records));
    }

    (paths, expected)
}

pub fn to_records(expected: &BTreeMap<Key, u64>) -> Vec<Record> {
    expected
        .iter()
        .map(|(key, count)| Record {
            key: key.clone(),
            count: *count,
        })
        .collect()
}
