//! Streaming shard reader.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::error::{Result, ShardsumError};
use crate::record::{Record, parse_key_line};
use crate::shard::{Compression, KeyOrder};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What each line of the input holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineFormat {
    /// `namespace<TAB>title<TAB>count`
    Record,
    /// `namespace<TAB>title[<TAB>...]`, yielded with a zero count.
    KeyList,
}

/// A peekable cursor over one shard.
///
/// The reader decodes one record ahead of the caller, so [`peek`](Self::peek)
/// never touches the input and only the lookahead record is held in memory.
/// Every decoded key is checked against the previous one; a key that sorts
/// before its predecessor fails with [`ShardsumError::ShardOrderViolation`].
pub struct ShardReader {
    path: PathBuf,
    input: Box<dyn BufRead + Send>,
    format: LineFormat,
    order: KeyOrder,
    buf: Vec<u8>,
    line: u64,
    head: Option<Record>,
    records_read: u64,
}

impl std::fmt::Debug for ShardReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardReader")
            .field("path", &self.path)
            .field("order", &self.order)
            .field("line", &self.line)
            .field("records_read", &self.records_read)
            .finish()
    }
}

impl ShardReader {
    /// Open a shard file, choosing the decoder from its name.
    pub fn open<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ShardsumError::corrupt(path, 0, format!("cannot open: {e}")))?;
        Self::with_format(
            path.to_path_buf(),
            file,
            Compression::from_path(path),
            order,
            LineFormat::Record,
        )
    }

    /// Open a sorted key list (`namespace<TAB>title` per line).
    ///
    /// Yielded records carry a count of zero.
    pub fn open_key_list<P: AsRef<Path>>(path: P, order: KeyOrder) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ShardsumError::corrupt(path, 0, format!("cannot open: {e}")))?;
        Self::with_format(
            path.to_path_buf(),
            file,
            Compression::from_path(path),
            order,
            LineFormat::KeyList,
        )
    }

    /// Read a shard from an arbitrary byte source. `name` identifies the shard
    /// in errors.
    pub fn from_reader<R>(
        name: impl Into<PathBuf>,
        input: R,
        compression: Compression,
        order: KeyOrder,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        Self::with_format(name.into(), input, compression, order, LineFormat::Record)
    }

    fn with_format<R>(
        path: PathBuf,
        input: R,
        compression: Compression,
        order: KeyOrder,
        format: LineFormat,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let input: Box<dyn BufRead + Send> = match compression {
            Compression::Gzip => Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                MultiGzDecoder::new(BufReader::new(input)),
            )),
            Compression::None => Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, input)),
        };

        let mut reader = ShardReader {
            path,
            input,
            format,
            order,
            buf: Vec::with_capacity(256),
            line: 0,
            head: None,
            records_read: 0,
        };
        reader.head = reader.decode_next()?;
        Ok(reader)
    }

    /// Path (or name) of the shard.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The next record, without consuming it.
    pub fn peek(&self) -> Option<&Record> {
        self.head.as_ref()
    }

    /// Consume and return the next record.
    pub fn advance(&mut self) -> Result<Option<Record>> {
        let Some(current) = self.head.take() else {
            return Ok(None);
        };

        let next = self.decode_next()?;
        if let Some(next) = &next {
            if !self.order.allows(&current.key, &next.key) {
                return Err(ShardsumError::ShardOrderViolation {
                    shard: self.path.clone(),
                    line: self.line,
                    previous: current.key,
                    current: next.key.clone(),
                });
            }
        }

        self.head = next;
        self.records_read += 1;
        Ok(Some(current))
    }

    /// Number of records handed out so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Decode the next line, or `None` at end of input.
    fn decode_next(&mut self) -> Result<Option<Record>> {
        self.buf.clear();
        let n = self.input.read_until(b'\n', &mut self.buf).map_err(|e| {
            ShardsumError::corrupt(&self.path, self.line + 1, format!("read failed: {e}"))
        })?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }

        if self.buf.is_empty() {
            // A single blank line is tolerated only at the very end.
            let at_end = self
                .input
                .fill_buf()
                .map_err(|e| {
                    ShardsumError::corrupt(&self.path, self.line + 1, format!("read failed: {e}"))
                })?
                .is_empty();
            if at_end {
                return Ok(None);
            }
            return Err(ShardsumError::corrupt(&self.path, self.line, "empty line"));
        }

        let parsed = match self.format {
            LineFormat::Record => Record::parse_line(&self.buf),
            LineFormat::KeyList => parse_key_line(&self.buf).map(|key| Record { key, count: 0 }),
        };
        parsed
            .map(Some)
            .map_err(|reason| ShardsumError::corrupt(&self.path, self.line, reason))
    }
}

impl Iterator for ShardReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.head = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    use flate2::write::GzEncoder;

    use crate::error::ErrorKind;
    use crate::record::Key;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn plain(text: &str, order: KeyOrder) -> Result<ShardReader> {
        ShardReader::from_reader(
            "mem.tsv",
            Cursor::new(text.as_bytes().to_vec()),
            Compression::None,
            order,
        )
    }

    #[test]
    fn test_peek_and_advance() {
        let data = gzip("0\tCat\t3\n0\tDog\t1\n");
        let mut reader = ShardReader::from_reader(
            "mem.tsv.gz",
            Cursor::new(data),
            Compression::Gzip,
            KeyOrder::Strict,
        )
        .unwrap();

        assert_eq!(reader.peek(), Some(&Record::new(0, "Cat", 3)));
        assert_eq!(reader.peek(), Some(&Record::new(0, "Cat", 3)));
        assert_eq!(reader.advance().unwrap(), Some(Record::new(0, "Cat", 3)));
        assert_eq!(reader.peek(), Some(&Record::new(0, "Dog", 1)));
        assert_eq!(reader.advance().unwrap(), Some(Record::new(0, "Dog", 1)));
        assert_eq!(reader.peek(), None);
        assert_eq!(reader.advance().unwrap(), None);
        assert_eq!(reader.records_read(), 2);
    }

    #[test]
    fn test_empty_shard() {
        let mut reader = plain("", KeyOrder::Strict).unwrap();
        assert!(reader.peek().is_none());
        assert!(reader.advance().unwrap().is_none());

        let data = gzip("");
        let mut reader = ShardReader::from_reader(
            "empty.gz",
            Cursor::new(data),
            Compression::Gzip,
            KeyOrder::Strict,
        )
        .unwrap();
        assert!(reader.advance().unwrap().is_none());
    }

    #[test]
    fn test_order_violation_reports_both_keys() {
        let reader = plain("0\tA\t1\n0\tA\t1\n0\tB\t1\n0\tA\t1\n", KeyOrder::NonDecreasing).unwrap();
        let results: Vec<_> = reader.collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        match &results[2] {
            Err(ShardsumError::ShardOrderViolation {
                shard,
                line,
                previous,
                current,
            }) => {
                assert_eq!(shard, Path::new("mem.tsv"));
                assert_eq!(*line, 4);
                assert_eq!(previous, &Key::new(0, "B"));
                assert_eq!(current, &Key::new(0, "A"));
            }
            other => panic!("expected order violation, got {other:?}"),
        }
    }

    #[test]
    fn test_strict_rejects_repeated_key() {
        let mut reader = plain("0\tA\t1\n0\tA\t1\n", KeyOrder::Strict).unwrap();
        let err = reader.advance().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShardOrderViolation);
    }

    #[test]
    fn test_namespace_orders_numerically() {
        let reader = plain("2\tB\t1\n10\tA\t1\n", KeyOrder::Strict).unwrap();
        let records: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_trailing_blank_line_and_missing_newline() {
        let reader = plain("0\tA\t1\n0\tB\t2\n\n", KeyOrder::Strict).unwrap();
        assert_eq!(reader.count(), 2);

        let reader = plain("0\tA\t1\n0\tB\t2", KeyOrder::Strict).unwrap();
        let records: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records[1], Record::new(0, "B", 2));
    }

    #[test]
    fn test_interior_blank_line_is_corrupt() {
        let mut reader = plain("0\tA\t1\n\n0\tB\t2\n", KeyOrder::Strict).unwrap();
        let err = reader.advance().unwrap_err();
        match err {
            ShardsumError::ShardCorrupt { line, reason, .. } => {
                assert_eq!(line, 2);
                assert_eq!(reason, "empty line");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_first_line_fails_open() {
        let err = plain("zero\tA\t1\n", KeyOrder::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShardCorrupt);
    }

    #[test]
    fn test_bad_gzip_is_corrupt() {
        let err = ShardReader::from_reader(
            "bad.gz",
            Cursor::new(b"definitely not gzip".to_vec()),
            Compression::Gzip,
            KeyOrder::Strict,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShardCorrupt);
    }

    #[test]
    fn test_truncated_gzip_is_corrupt() {
        let mut data = gzip("0\tA\t1\n0\tB\t1\n0\tC\t1\n");
        data.truncate(data.len() - 6);
        let reader = ShardReader::from_reader(
            "truncated.gz",
            Cursor::new(data),
            Compression::Gzip,
            KeyOrder::Strict,
        );
        let failed = match reader {
            Err(e) => e.kind() == ErrorKind::ShardCorrupt,
            Ok(reader) => reader
                .filter_map(|r| r.err())
                .any(|e| e.kind() == ErrorKind::ShardCorrupt),
        };
        assert!(failed);
    }

    #[test]
    fn test_missing_file() {
        let err = ShardReader::open("/nonexistent/shard.tsv.gz", KeyOrder::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShardCorrupt);
        assert_eq!(err.shard(), Some(Path::new("/nonexistent/shard.tsv.gz")));
    }

    #[test]
    fn test_key_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("titles.tsv");
        std::fs::write(&path, "0\tCat\n0\tDog\textra\n").unwrap();

        let reader = ShardReader::open_key_list(&path, KeyOrder::NonDecreasing).unwrap();
        let records: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records, vec![Record::new(0, "Cat", 0), Record::new(0, "Dog", 0)]);
    }
}
