//! Records and keys.
//!
//! A record is one `namespace<TAB>title<TAB>count` line. Records are ordered
//! by [`Key`]: namespace numerically, then title byte-wise. Byte-wise title
//! order is independent of the process locale, so the same inputs always
//! merge into the same output.

use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

/// Namespace component of a key.
pub type Namespace = i64;

/// Value column summed across shards.
pub type Count = u64;

/// The `(namespace, title)` ordering key.
///
/// The derived ordering compares `namespace` first and then `title`; `String`
/// compares by its UTF-8 bytes, which is the byte-wise collation shards are
/// sorted by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub namespace: Namespace,
    pub title: String,
}

impl Key {
    pub fn new(namespace: Namespace, title: impl Into<String>) -> Self {
        Key {
            namespace,
            title: title.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.namespace, self.title)
    }
}

/// One line of a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Key,
    pub count: Count,
}

impl Record {
    pub fn new(namespace: Namespace, title: impl Into<String>, count: Count) -> Self {
        Record {
            key: Key::new(namespace, title),
            count,
        }
    }

    /// Parse a `namespace<TAB>title<TAB>count` line (without its newline).
    ///
    /// The error string describes what is wrong with the line; callers attach
    /// the shard and line number.
    pub fn parse_line(line: &[u8]) -> std::result::Result<Record, String> {
        let mut fields = line.split(|&b| b == b'\t');
        let (Some(namespace), Some(title), Some(count), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            let found = line.split(|&b| b == b'\t').count();
            return Err(format!("expected 3 tab-separated fields, found {found}"));
        };

        Ok(Record {
            key: Key {
                namespace: parse_namespace(namespace)?,
                title: parse_title(title)?,
            },
            count: parse_count(count)?,
        })
    }

    /// Write the record as one newline-terminated line.
    pub fn write_line<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "{}\t{}\t{}",
            self.key.namespace, self.key.title, self.count
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.count)
    }
}

/// Parse a key-list line: `namespace<TAB>title`, with any further columns
/// ignored.
pub fn parse_key_line(line: &[u8]) -> std::result::Result<Key, String> {
    let mut fields = line.split(|&b| b == b'\t');
    let (Some(namespace), Some(title)) = (fields.next(), fields.next()) else {
        return Err("expected at least 2 tab-separated fields, found 1".to_string());
    };
    Ok(Key {
        namespace: parse_namespace(namespace)?,
        title: parse_title(title)?,
    })
}

fn parse_namespace(field: &[u8]) -> std::result::Result<Namespace, String> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<Namespace>().ok())
        .ok_or_else(|| format!("invalid namespace {:?}", String::from_utf8_lossy(field)))
}

fn parse_title(field: &[u8]) -> std::result::Result<String, String> {
    String::from_utf8(field.to_vec()).map_err(|_| "title is not valid UTF-8".to_string())
}

fn parse_count(field: &[u8]) -> std::result::Result<Count, String> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<Count>().ok())
        .ok_or_else(|| format!("invalid count {:?}", String::from_utf8_lossy(field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            Key::new(1, "Cat"),
            Key::new(0, "dog"),
            Key::new(-1, "Zebra"),
            Key::new(0, "Dog"),
            Key::new(10, "A"),
            Key::new(2, "A"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::new(-1, "Zebra"),
                Key::new(0, "Dog"),
                Key::new(0, "dog"),
                Key::new(1, "Cat"),
                Key::new(2, "A"),
                Key::new(10, "A"),
            ]
        );
    }

    #[test]
    fn test_title_order_is_bytewise() {
        // Uppercase sorts before lowercase and multi-byte characters sort
        // after ASCII, whatever the locale says.
        assert!(Key::new(0, "Zulu") < Key::new(0, "alpha"));
        assert!(Key::new(0, "zzz") < Key::new(0, "Élan"));
        assert!(Key::new(0, "Ab") < Key::new(0, "Ab_c"));
    }

    #[test]
    fn test_parse_line() {
        let record = Record::parse_line(b"4\tMain_Page\t17").unwrap();
        assert_eq!(record, Record::new(4, "Main_Page", 17));

        let record = Record::parse_line(b"-2\t\t0").unwrap();
        assert_eq!(record, Record::new(-2, "", 0));
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(Record::parse_line(b"0\tTitle").unwrap_err().contains("found 2"));
        assert!(Record::parse_line(b"0\tA\t1\textra").unwrap_err().contains("found 4"));
        assert!(Record::parse_line(b"x\tA\t1").unwrap_err().contains("namespace"));
        assert!(Record::parse_line(b"0\tA\t-1").unwrap_err().contains("count"));
        assert!(Record::parse_line(b"0\tA\t18446744073709551616").is_err());
        assert!(Record::parse_line(b"0\t\xff\xfe\t1").unwrap_err().contains("UTF-8"));
    }

    #[test]
    fn test_write_line() {
        let mut out = Vec::new();
        Record::new(0, "Cat", 5).write_line(&mut out).unwrap();
        Record::new(-1, "Special:Log", 1).write_line(&mut out).unwrap();
        assert_eq!(out, b"0\tCat\t5\n-1\tSpecial:Log\t1\n");
    }

    #[test]
    fn test_parse_key_line() {
        assert_eq!(parse_key_line(b"0\tCat").unwrap(), Key::new(0, "Cat"));
        assert_eq!(parse_key_line(b"14\tDog\t99").unwrap(), Key::new(14, "Dog"));
        assert!(parse_key_line(b"Cat").is_err());
    }
}
