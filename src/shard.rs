//! Shard files.
//!
//! A shard is a newline-delimited, tab-separated file of records sorted by
//! key. Shards whose name ends in `.gz` are gzip-compressed; any other name is
//! read and written as plain text.

pub mod reader;
pub mod writer;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use reader::ShardReader;
pub use writer::{ShardWriter, WrittenShard};

/// Default gzip level for written shards.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// On-disk encoding of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Gzip,
    None,
}

impl Compression {
    /// Pick the encoding from the file name.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

/// How strictly a reader checks key order within one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Each key must be `>=` its predecessor. Repeated keys are summed
    /// downstream like cross-shard duplicates.
    #[default]
    NonDecreasing,
    /// Each key must be `>` its predecessor.
    Strict,
}

impl KeyOrder {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            KeyOrder::Strict
        } else {
            KeyOrder::NonDecreasing
        }
    }

    /// Whether `current` may follow `previous` in one shard.
    pub fn allows<T: Ord>(self, previous: &T, current: &T) -> bool {
        match self {
            KeyOrder::NonDecreasing => previous <= current,
            KeyOrder::Strict => previous < current,
        }
    }
}
