//! Append-only metadata journal.
//!
//! Each record is a little-endian `u32` length followed by a `bincode`
//! body. Replaying the journal rebuilds the metadata index. A record cut off
//! by a crash ends the replay and is truncated away before new appends.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tiling::TileKey;

/// Bookkeeping for one cold entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Remote fetch time; TTL is measured from here (epoch millis).
    pub fetched_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
    /// Compressed payload size on disk.
    pub stored_bytes: u64,
    /// Uncompressed content size.
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) enum JournalRecord {
    PutGeometry { id: String, meta: EntryMeta },
    PutTile { key: TileKey, meta: EntryMeta },
    TouchGeometry { id: String, at: i64 },
    TouchTile { key: TileKey, at: i64 },
    RemoveGeometry { id: String },
    RemoveTile { key: TileKey },
    Clear,
}

impl JournalRecord {
    /// Records that must reach disk before the write is acknowledged.
    fn is_durable(&self) -> bool {
        !matches!(
            self,
            JournalRecord::TouchGeometry { .. } | JournalRecord::TouchTile { .. }
        )
    }
}

/// Upper bound on a single record; larger lengths indicate corruption.
const MAX_RECORD_BYTES: u32 = 16 * 1024 * 1024;

pub(super) struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

/// Read framed records from `reader`, stopping at the first incomplete one.
///
/// Returns the records and the byte offset just past the last complete one.
fn read_records<R: Read>(reader: &mut R) -> (Vec<JournalRecord>, u64) {
    let mut records = Vec::new();
    let mut offset = 0u64;
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_RECORD_BYTES {
            break;
        }
        let mut body = vec![0u8; len as usize];
        if reader.read_exact(&mut body).is_err() {
            break;
        }
        match bincode::deserialize::<JournalRecord>(&body) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        offset += 4 + u64::from(len);
    }
    (records, offset)
}

fn write_record<W: Write>(writer: &mut W, record: &JournalRecord) -> io::Result<()> {
    let body = bincode::serialize(record).map_err(io::Error::other)?;
    let len = u32::try_from(body.len()).map_err(io::Error::other)?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)
}

impl Journal {
    /// Open (or create) the journal and return its replayable records.
    pub(super) fn open(path: &Path) -> io::Result<(Self, Vec<JournalRecord>)> {
        let records = if path.exists() {
            let file = File::open(path)?;
            let file_len = file.metadata()?.len();
            let (records, valid_len) = read_records(&mut BufReader::new(file));
            if valid_len < file_len {
                warn!(
                    path = %path.display(),
                    valid_bytes = valid_len,
                    file_bytes = file_len,
                    "Truncating incomplete journal tail"
                );
                OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
            }
            records
        } else {
            Vec::new()
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
                records: records.len() as u64,
            },
            records,
        ))
    }

    /// Append a record. Put, remove and clear records are flushed immediately;
    /// touch records stay buffered until the next flush.
    pub(super) fn append(&mut self, record: &JournalRecord) -> io::Result<()> {
        write_record(&mut self.writer, record)?;
        self.records += 1;
        if record.is_durable() {
            self.writer.flush()?;
        }
        Ok(())
    }

    pub(super) fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Total records in the journal file.
    pub(super) fn record_count(&self) -> u64 {
        self.records
    }

    /// Replace the journal contents with `records`.
    pub(super) fn rewrite(&mut self, records: &[JournalRecord]) -> io::Result<()> {
        self.writer.flush()?;
        let temp_path = self.path.with_extension("log.tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            for record in records {
                write_record(&mut writer, record)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&temp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.records = records.len() as u64;
        Ok(())
    }
}
