//! Append-only mutation log.
//!
//! Every insert, update and delete is one checksummed frame. Replaying the
//! frames in order rebuilds the record table.

use crate::error::{Result, StoreError};
use crate::types::{Record, RecordId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the mutation log.
const LOG_MAGIC: &[u8; 4] = b"BLG\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Frame overhead (length prefix + checksum).
const FRAME_OVERHEAD: u64 = 8;

/// Frames larger than this are treated as garbage.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A single durable mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    Insert(Record),
    Update(Record),
    Delete(RecordId),
    /// Written first by compaction so the id high-water mark survives
    /// the removal of deleted records' inserts.
    Checkpoint { next_id: RecordId },
}

struct LogFile {
    file: File,
    size: u64,
    entries: u64,
    writes_since_sync: u64,
}

/// Append-only mutation log.
pub struct MutationLog {
    /// Path to the log file.
    path: PathBuf,

    inner: Mutex<LogFile>,

    /// Sync every N writes (0 is treated as 1).
    sync_interval: u64,
}

/// Why replay stopped before the end of the file.
enum FrameError {
    Torn(String),
    Fatal(StoreError),
}

impl MutationLog {
    /// Open or create a log and replay its entries.
    ///
    /// A torn or corrupt trailing frame is cut off so that the next append
    /// starts on a clean boundary.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut size = file.metadata()?.len();

        if size < HEADER_SIZE {
            if size > 0 {
                warn!(path = %path.display(), size, "discarding partial log header");
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            Self::write_header(&mut file)?;
            file.sync_all()?;
            size = HEADER_SIZE;
        } else {
            Self::verify_header(&mut file)?;
        }

        let (entries, valid_len) = Self::replay(&file, size)?;

        if valid_len < size {
            warn!(
                path = %path.display(),
                valid_len,
                discarded = size - valid_len,
                "truncating torn tail of mutation log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
            size = valid_len;
        }

        debug!(path = %path.display(), entries = entries.len(), "mutation log replayed");

        let log = Self {
            path,
            inner: Mutex::new(LogFile {
                file,
                size,
                entries: entries.len() as u64,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
        };

        Ok((log, entries))
    }

    /// Append one entry. Returns the offset it was written at.
    ///
    /// On failure the file is cut back to its previous length, so a failed
    /// append leaves nothing behind.
    pub fn append(&self, entry: &LogEntry) -> Result<u64> {
        let frame = Self::encode_frame(entry)?;

        let mut inner = self.inner.lock();
        let offset = inner.size;

        let written = match inner.file.seek(SeekFrom::Start(offset)) {
            Ok(_) => inner.file.write_all(&frame),
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(rollback) = inner.file.set_len(offset) {
                warn!(offset, error = %rollback, "failed to roll back partial frame");
            }
            return Err(e.into());
        }

        inner.writes_since_sync += 1;
        if inner.writes_since_sync >= self.sync_interval {
            if let Err(e) = inner.file.sync_all() {
                if let Err(rollback) = inner.file.set_len(offset) {
                    warn!(offset, error = %rollback, "failed to roll back unsynced frame");
                }
                return Err(e.into());
            }
            inner.writes_since_sync = 0;
        }

        inner.size = offset + frame.len() as u64;
        inner.entries += 1;

        Ok(offset)
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Replace the whole log with `entries`.
    ///
    /// The new log is built next to the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact.
    pub fn rewrite(&self, entries: &[LogEntry]) -> Result<()> {
        let mut inner = self.inner.lock();

        let tmp_path = self.path.with_extension("log.compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let result = (|| -> Result<u64> {
            Self::write_header(&mut tmp)?;
            let mut size = HEADER_SIZE;
            for entry in entries {
                let frame = Self::encode_frame(entry)?;
                tmp.write_all(&frame)?;
                size += frame.len() as u64;
            }
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(size)
        })();

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        inner.file = tmp;
        inner.size = size;
        inner.entries = entries.len() as u64;
        inner.writes_since_sync = 0;

        Ok(())
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Number of frames in the log.
    pub fn entry_count(&self) -> u64 {
        self.inner.lock().entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(file: &mut File) -> Result<()> {
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        Ok(())
    }

    fn verify_header(file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid log magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported log version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        let len = u32::try_from(encoded.len())
            .map_err(|_| StoreError::Serialization("log entry too large".into()))?;

        let mut frame = Vec::with_capacity(encoded.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Read every frame after the header. Returns the entries and the length
    /// of the valid prefix of the file.
    fn replay(file: &File, size: u64) -> Result<(Vec<LogEntry>, u64)> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset < size {
            match Self::read_frame(&mut reader) {
                Ok((entry, frame_len)) => {
                    entries.push(entry);
                    offset += frame_len;
                }
                Err(FrameError::Torn(reason)) => {
                    warn!(offset, %reason, "unreadable frame in mutation log");
                    break;
                }
                Err(FrameError::Fatal(e)) => return Err(e),
            }
        }

        Ok((entries, offset.min(size)))
    }

    fn read_frame(reader: &mut impl Read) -> std::result::Result<(LogEntry, u64), FrameError> {
        let torn = |e: std::io::Error| {
            if e.kind() == ErrorKind::UnexpectedEof {
                FrameError::Torn("truncated frame".into())
            } else {
                FrameError::Fatal(e.into())
            }
        };

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).map_err(torn)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Err(FrameError::Torn(format!("frame length {len} too large")));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded).map_err(torn)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes).map_err(torn)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);

        if stored_checksum != computed_checksum {
            return Err(FrameError::Torn(
                StoreError::ChecksumMismatch {
                    expected: stored_checksum,
                    got: computed_checksum,
                }
                .to_string(),
            ));
        }

        let entry = rmp_serde::from_slice(&encoded)
            .map_err(|e| FrameError::Fatal(StoreError::from(e)))?;

        Ok((entry, len as u64 + FRAME_OVERHEAD))
    }
}
