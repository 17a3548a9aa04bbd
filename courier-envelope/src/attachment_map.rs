//! Binary attachment map serialization.
//!
//! At crash time, multiple attachment payloads are written into a single
//! compact container instead of individual envelope items. The format is a
//! MessagePack subset: a fixmap whose values are binary blobs identified by
//! short string keys:
//!
//! ```plain
//! 0x80 | count                          map marker, count <= 15
//! 0xD9 <len u8> <key bytes>             per entry: str8 key
//! 0xC6 <len u32 big-endian> <payload>   per entry: bin32 value
//! ```
//!
//! The encoder is strict: it fails instead of emitting a corrupt entry when a
//! payload is empty, a file is unreadable, or a size limit is exceeded.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use bytes::Bytes;

/// Marker byte for a fixmap, ORed with the entry count.
const MAP_MARKER: u8 = 0x80;
/// Marker byte for a str8 key.
const KEY_MARKER: u8 = 0xD9;
/// Marker byte for a bin32 value.
const VALUE_MARKER: u8 = 0xC6;

/// The maximum number of entries a fixmap can hold.
const MAX_ENTRIES: usize = 15;

/// An error returned when encoding an attachment map fails.
///
/// No partial output can be relied upon after an error; the caller must
/// discard the written bytes.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentMapError {
    /// More entries than the map marker can express.
    #[error("too many attachment map entries: {0}")]
    TooManyEntries(usize),
    /// The key does not fit the single length byte.
    #[error("attachment key too long: {0} bytes")]
    KeyTooLong(usize),
    /// Empty payloads cannot be encoded.
    #[error("attachment `{0}` has no data")]
    EmptyPayload(String),
    /// The payload exceeds the 4-byte length prefix.
    #[error("attachment `{0}` exceeds the maximum encodable size")]
    PayloadTooLarge(String),
    /// A file-backed payload could not be opened or read.
    #[error("could not read attachment `{key}`")]
    PayloadIo {
        /// The key of the offending entry.
        key: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The output writer failed.
    #[error("failed to write attachment map")]
    WriteFailed(#[source] io::Error),
}

/// The data source of one attachment map entry.
#[derive(Clone, Debug)]
pub enum AttachmentSource {
    /// An in-memory payload.
    Bytes(Bytes),
    /// A payload streamed from a file on disk.
    Path(PathBuf),
}

impl From<Bytes> for AttachmentSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<PathBuf> for AttachmentSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Writes the given entries as a binary attachment map.
///
/// Entry order is preserved. File-backed payloads are streamed and never
/// loaded into memory as a whole. On any error nothing useful has been
/// written; the format has no recovery markers by design.
pub fn write_attachment_map<'a, W, I>(mut writer: W, entries: I) -> Result<(), AttachmentMapError>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a AttachmentSource)>,
{
    let entries: Vec<_> = entries.into_iter().collect();

    if entries.len() > MAX_ENTRIES {
        return Err(AttachmentMapError::TooManyEntries(entries.len()));
    }

    writer
        .write_all(&[MAP_MARKER | entries.len() as u8])
        .map_err(AttachmentMapError::WriteFailed)?;

    for (key, source) in entries {
        write_key(&mut writer, key)?;

        match source {
            AttachmentSource::Bytes(bytes) => write_bytes_value(&mut writer, key, bytes)?,
            AttachmentSource::Path(path) => {
                let file = File::open(path).map_err(|source| AttachmentMapError::PayloadIo {
                    key: key.to_owned(),
                    source,
                })?;
                write_file_value(&mut writer, key, file)?;
            }
        }
    }

    Ok(())
}

fn write_key<W: Write>(mut writer: W, key: &str) -> Result<(), AttachmentMapError> {
    let len = key.len();
    if len > u8::MAX as usize {
        return Err(AttachmentMapError::KeyTooLong(len));
    }

    writer
        .write_all(&[KEY_MARKER, len as u8])
        .and_then(|()| writer.write_all(key.as_bytes()))
        .map_err(AttachmentMapError::WriteFailed)
}

fn write_value_header<W: Write>(
    mut writer: W,
    key: &str,
    len: u64,
) -> Result<(), AttachmentMapError> {
    if len == 0 {
        return Err(AttachmentMapError::EmptyPayload(key.to_owned()));
    }
    if len > u32::MAX as u64 {
        return Err(AttachmentMapError::PayloadTooLarge(key.to_owned()));
    }

    writer
        .write_all(&[VALUE_MARKER])
        .and_then(|()| writer.write_all(&(len as u32).to_be_bytes()))
        .map_err(AttachmentMapError::WriteFailed)
}

fn write_bytes_value<W: Write>(
    mut writer: W,
    key: &str,
    bytes: &Bytes,
) -> Result<(), AttachmentMapError> {
    write_value_header(&mut writer, key, bytes.len() as u64)?;
    writer
        .write_all(bytes)
        .map_err(AttachmentMapError::WriteFailed)
}

fn write_file_value<W: Write>(
    mut writer: W,
    key: &str,
    file: File,
) -> Result<(), AttachmentMapError> {
    let len = file
        .metadata()
        .map_err(|source| AttachmentMapError::PayloadIo {
            key: key.to_owned(),
            source,
        })?
        .len();

    write_value_header(&mut writer, key, len)?;

    // Stream exactly the length declared in the header. A file that shrinks
    // mid-read would otherwise corrupt the container.
    let mut remaining = file.take(len);
    let copied = io::copy(&mut remaining, &mut writer).map_err(AttachmentMapError::WriteFailed)?;

    if copied != len {
        return Err(AttachmentMapError::PayloadIo {
            key: key.to_owned(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "file truncated during read"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn test_write_two_entries_exact_bytes() {
        let crash = AttachmentSource::Bytes(Bytes::from(&b"crash"[..]));
        let log = AttachmentSource::Bytes(Bytes::from(&b"ab"[..]));

        let mut out = Vec::new();
        write_attachment_map(&mut out, [("report", &crash), ("log", &log)]).unwrap();

        let mut expected = vec![0x82];
        expected.extend([0xD9, 6]);
        expected.extend(b"report");
        expected.extend([0xC6, 0, 0, 0, 5]);
        expected.extend(b"crash");
        expected.extend([0xD9, 3]);
        expected.extend(b"log");
        expected.extend([0xC6, 0, 0, 0, 2]);
        expected.extend(b"ab");

        assert_eq!(out, expected);
    }

    #[test]
    fn test_write_empty_map() {
        let mut out = Vec::new();
        write_attachment_map(&mut out, std::iter::empty::<(&str, &AttachmentSource)>()).unwrap();
        assert_eq!(out, vec![0x80]);
    }

    #[test]
    fn test_empty_payload_fails() {
        let empty = AttachmentSource::Bytes(Bytes::new());

        let mut out = Vec::new();
        let result = write_attachment_map(&mut out, [("report", &empty)]);
        assert!(matches!(result, Err(AttachmentMapError::EmptyPayload(_))));
    }

    #[test]
    fn test_missing_file_fails() {
        let source = AttachmentSource::Path(PathBuf::from("/nonexistent/report.dmp"));

        let mut out = Vec::new();
        let result = write_attachment_map(&mut out, [("report", &source)]);
        assert!(matches!(result, Err(AttachmentMapError::PayloadIo { .. })));
    }

    #[test]
    fn test_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        File::create(&path).unwrap();

        let source = AttachmentSource::Path(path);
        let mut out = Vec::new();
        let result = write_attachment_map(&mut out, [("report", &source)]);
        assert!(matches!(result, Err(AttachmentMapError::EmptyPayload(_))));
    }

    #[test]
    fn test_file_source_streams_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"minidump-bytes").unwrap();
        drop(file);

        let source = AttachmentSource::Path(path);
        let mut out = Vec::new();
        write_attachment_map(&mut out, [("report", &source)]).unwrap();

        let mut expected = vec![0x81, 0xD9, 6];
        expected.extend(b"report");
        expected.extend([0xC6, 0, 0, 0, 14]);
        expected.extend(b"minidump-bytes");
        assert_eq!(out, expected);
    }

    #[test]
    fn test_too_many_entries_fails() {
        let payload = AttachmentSource::Bytes(Bytes::from(&b"x"[..]));
        let entries: Vec<(String, &AttachmentSource)> =
            (0..16).map(|i| (format!("key{i}"), &payload)).collect();

        let mut out = Vec::new();
        let result = write_attachment_map(
            &mut out,
            entries.iter().map(|(key, source)| (key.as_str(), *source)),
        );
        assert!(matches!(
            result,
            Err(AttachmentMapError::TooManyEntries(16))
        ));
    }

    #[test]
    fn test_long_key_fails() {
        let payload = AttachmentSource::Bytes(Bytes::from(&b"x"[..]));
        let key = "k".repeat(300);

        let mut out = Vec::new();
        let result = write_attachment_map(&mut out, [(key.as_str(), &payload)]);
        assert!(matches!(result, Err(AttachmentMapError::KeyTooLong(300))));
    }
}
