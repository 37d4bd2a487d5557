//! Core types for the record store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a record.
///
/// Assigned by the store on insert and never reused, not even after the
/// record is deleted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn next(self) -> Self {
        RecordId(self.0 + 1)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    ///
    /// A clock set before 1970 reads as the epoch.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp(millis)
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// Move back in time, clamping at `i64::MIN`.
    pub fn saturating_sub_millis(self, millis: i64) -> Self {
        Timestamp(self.0.saturating_sub(millis))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One blood-pressure measurement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (assigned by store).
    pub id: RecordId,

    /// When the measurement was taken. User-editable, so it need not follow
    /// insertion order.
    pub timestamp: Timestamp,

    /// Systolic pressure, mmHg.
    pub systolic: u32,

    /// Diastolic pressure, mmHg.
    pub diastolic: u32,

    /// Pulse, beats per minute.
    pub pulse: u32,
}

/// Input for creating a new record (before id assigned).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordInput {
    pub timestamp: Timestamp,
    pub systolic: u32,
    pub diastolic: u32,
    pub pulse: u32,
}

impl RecordInput {
    pub fn new(timestamp: Timestamp, systolic: u32, diastolic: u32, pulse: u32) -> Self {
        Self {
            timestamp,
            systolic,
            diastolic,
            pulse,
        }
    }

    /// Attach an identity.
    pub fn into_record(self, id: RecordId) -> Record {
        Record {
            id,
            timestamp: self.timestamp,
            systolic: self.systolic,
            diastolic: self.diastolic,
            pulse: self.pulse,
        }
    }
}

impl From<&Record> for RecordInput {
    fn from(record: &Record) -> Self {
        Self {
            timestamp: record.timestamp,
            systolic: record.systolic,
            diastolic: record.diastolic,
            pulse: record.pulse,
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub record_count: u64,
    pub log_entries: u64,
    pub log_size_bytes: u64,
}
