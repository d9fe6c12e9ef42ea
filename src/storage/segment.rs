//! Log segment files
//!
//! A [`LogSegment`] is one append-only file inside a log directory, named by
//! the 20-digit zero-padded logical offset of its first record. Records are
//! framed as `[u32 length][u32 crc32][payload]`, little-endian. The tail
//! segment of a log is *active* (open for appends); all others are sealed
//! and immutable until retention deletes them.
//!
//! Opening an active segment scans the frame stream to find the valid
//! prefix. With recovery enabled a torn or corrupt tail is truncated away;
//! without it, a torn tail is an error, since a cleanly shut down log never
//! leaves one.

use crate::error::{Result, SkiffError};
use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{trace, warn};

/// File extension of segment files
pub const SEGMENT_FILE_SUFFIX: &str = ".log";

/// Bytes of framing per record: u32 length + u32 crc32
pub const RECORD_HEADER_SIZE: u64 = 8;

/// Generate a segment file name from its base offset
pub fn segment_filename(base_offset: i64) -> String {
    format!("{:020}{}", base_offset, SEGMENT_FILE_SUFFIX)
}

/// Parse a segment file name back into its base offset.
///
/// Returns `None` for files that are not well-formed segment names.
pub fn parse_segment_filename(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(SEGMENT_FILE_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<i64>().ok()
}

/// A single segment file within a log
#[derive(Debug)]
pub struct LogSegment {
    path: PathBuf,
    base_offset: i64,
    next_offset: i64,
    size: u64,
    writer: Option<BufWriter<File>>,
    sealed: bool,
    deleted: bool,
}

impl LogSegment {
    /// Create a fresh active segment in `dir` starting at `base_offset`.
    ///
    /// The file is opened in append mode and never truncated, so a creation
    /// race against an already-registered segment cannot destroy data.
    pub fn create(dir: &Path, base_offset: i64) -> Result<Self> {
        let path = dir.join(segment_filename(base_offset));
        Self::open_active(path, base_offset, false)
    }

    /// Open the segment at `path` as the active (appendable) segment.
    ///
    /// Scans the record frames to establish the record count and the valid
    /// byte length. When `recover` is set, a torn or corrupt tail is
    /// truncated; otherwise it is surfaced as [`SkiffError::Corrupt`].
    pub fn open_active(path: PathBuf, base_offset: i64, recover: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let (record_count, valid_len) = scan_valid_prefix(&path)?;
        if valid_len < file_len {
            if recover {
                warn!(
                    path = %path.display(),
                    file_len,
                    valid_len,
                    "Truncating torn tail of active segment"
                );
                file.set_len(valid_len)?;
            } else {
                return Err(SkiffError::Corrupt(format!(
                    "segment {} has {} bytes of invalid data past offset {}",
                    path.display(),
                    file_len - valid_len,
                    valid_len
                )));
            }
        }

        trace!(
            path = %path.display(),
            base_offset,
            records = record_count,
            bytes = valid_len,
            "Opened active segment"
        );

        Ok(Self {
            path,
            base_offset,
            next_offset: base_offset + i64::from(record_count),
            size: valid_len,
            writer: Some(BufWriter::new(file)),
            sealed: false,
            deleted: false,
        })
    }

    /// Open a sealed (immutable) segment. No frame scan is performed; the
    /// size comes from file metadata and records are read on demand.
    pub fn open_sealed(path: PathBuf, base_offset: i64) -> Result<Self> {
        let size = fs::metadata(&path)?.len();
        Ok(Self {
            path,
            base_offset,
            next_offset: base_offset,
            size,
            writer: None,
            sealed: true,
            deleted: false,
        })
    }

    /// Append one record.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            SkiffError::storage_msg(format!(
                "cannot append to sealed segment {}",
                self.path.display()
            ))
        })?;

        let len = payload.len() as u32;
        let crc = crc32fast::hash(payload);
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.write_all(payload)?;

        self.size += RECORD_HEADER_SIZE + u64::from(len);
        self.next_offset += 1;
        Ok(())
    }

    /// Flush buffered appends and fsync the data to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Seal this segment: flush, sync, and drop the writer. Sealed segments
    /// only ever shrink the log by being deleted.
    pub fn seal(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;
        self.sealed = true;
        Ok(())
    }

    /// Close the backing file handle, flushing any buffered appends.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Current size in bytes, framing included
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn base_offset(&self) -> i64 {
        self.base_offset
    }

    /// Offset one past the last record. Only meaningful for segments opened
    /// active, where the frame scan established the record count.
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last-modified time of the backing file in epoch milliseconds.
    ///
    /// Unreadable metadata yields `i64::MAX` so an unstattable segment is
    /// never considered expired.
    pub fn last_modified(&self) -> i64 {
        match fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|t| t.duration_since(UNIX_EPOCH))
        {
            Ok(Ok(age)) => age.as_millis() as i64,
            _ => {
                warn!(path = %self.path.display(), "Could not stat segment file");
                i64::MAX
            }
        }
    }

    /// Mark this segment for deletion. The file is unlinked later by the
    /// retention sweep.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Read every record payload in this segment, oldest first.
    pub fn read_records(&self) -> Result<Vec<Bytes>> {
        read_record_file(&self.path, self.size)
    }
}

/// Scan record frames from the start of the file, returning the number of
/// valid records and the byte length of the valid prefix.
fn scan_valid_prefix(path: &Path) -> Result<(u32, u64)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut count: u32 = 0;
    let mut valid_len: u64 = 0;
    let mut header = [0u8; RECORD_HEADER_SIZE as usize];
    let mut payload = Vec::new();

    while valid_len + RECORD_HEADER_SIZE <= file_len {
        reader.read_exact(&mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if valid_len + RECORD_HEADER_SIZE + u64::from(len) > file_len {
            break; // torn write
        }
        payload.resize(len as usize, 0);
        reader.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != crc {
            break; // corrupt record
        }
        count += 1;
        valid_len += RECORD_HEADER_SIZE + u64::from(len);
    }

    Ok((count, valid_len))
}

/// Read record payloads from a segment file, stopping at `limit` bytes.
fn read_record_file(path: &Path, limit: u64) -> Result<Vec<Bytes>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut pos: u64 = 0;
    let mut header = [0u8; RECORD_HEADER_SIZE as usize];

    while pos + RECORD_HEADER_SIZE <= limit {
        reader.read_exact(&mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if pos + RECORD_HEADER_SIZE + u64::from(len) > limit {
            break;
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != crc {
            return Err(SkiffError::Corrupt(format!(
                "crc mismatch in {} at byte {}",
                path.display(),
                pos
            )));
        }
        records.push(Bytes::from(payload));
        pos += RECORD_HEADER_SIZE + u64::from(len);
    }

    Ok(records)
}
