//! Atomic shard writer.
//!
//! Records are streamed into a temporary file created next to the
//! destination. [`ShardWriter::commit`] finishes the encoder, syncs the file
//! and renames it onto the destination; nothing ever appears under the
//! destination name until then. Dropping an uncommitted writer removes the
//! temporary file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::GzBuilder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, ShardsumError};
use crate::record::Record;
use crate::shard::Compression;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

enum Sink {
    Gzip(GzEncoder<BufWriter<NamedTempFile>>),
    Plain(BufWriter<NamedTempFile>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Gzip(encoder) => encoder,
            Sink::Plain(writer) => writer,
        }
    }

    fn finish(self) -> std::io::Result<NamedTempFile> {
        let buffered = match self {
            Sink::Gzip(encoder) => encoder.finish()?,
            Sink::Plain(writer) => writer,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

/// A shard that has been renamed into place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenShard {
    pub path: PathBuf,
    pub records: u64,
}

/// Writes records to a temporary file and renames it into place on commit.
pub struct ShardWriter {
    dest: PathBuf,
    sink: Sink,
    records: u64,
}

impl std::fmt::Debug for ShardWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardWriter")
            .field("dest", &self.dest)
            .field("records", &self.records)
            .finish()
    }
}

impl ShardWriter {
    /// Start writing a shard destined for `dest`.
    ///
    /// The encoding follows the destination name. `level` is the gzip level
    /// (0-9) and is ignored for plain text.
    pub fn create<P: AsRef<Path>>(dest: P, level: u32) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "shard".to_string());

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| ShardsumError::writer(&dest, e))?;
        let buffered = BufWriter::with_capacity(WRITE_BUFFER_SIZE, temp);

        // GzBuilder leaves the header mtime at zero, so identical records
        // always produce identical bytes.
        let sink = match Compression::from_path(&dest) {
            Compression::Gzip => Sink::Gzip(
                GzBuilder::new().write(buffered, flate2::Compression::new(level.min(9))),
            ),
            Compression::None => Sink::Plain(buffered),
        };

        Ok(ShardWriter {
            dest,
            sink,
            records: 0,
        })
    }

    /// Destination path.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append one record.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        record
            .write_line(self.sink.writer())
            .map_err(|e| ShardsumError::writer(&self.dest, e))?;
        self.records += 1;
        Ok(())
    }

    /// Finish the encoding, sync and atomically rename onto the destination.
    pub fn commit(self) -> Result<WrittenShard> {
        let ShardWriter {
            dest,
            sink,
            records,
        } = self;

        let temp = sink.finish().map_err(|e| ShardsumError::writer(&dest, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| ShardsumError::writer(&dest, e))?;
        let file: File = temp
            .persist(&dest)
            .map_err(|e| ShardsumError::writer(&dest, e.error))?;
        drop(file);

        Ok(WrittenShard {
            path: dest,
            records,
        })
    }

    /// Abandon the shard; the temporary file is removed.
    pub fn abort(self) {
        drop(self);
    }
}
