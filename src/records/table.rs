//! In-memory record table rebuilt from the mutation log.

use super::log::LogEntry;
use crate::error::{Result, StoreError};
use crate::types::{Record, RecordId, Timestamp};
use std::collections::{BTreeSet, HashMap};

/// Live records, indexed by id and by time.
#[derive(Debug)]
pub struct RecordTable {
    /// Record ID to record.
    by_id: HashMap<RecordId, Record>,

    /// (timestamp, id) pairs; iterated in reverse for newest first.
    by_time: BTreeSet<(Timestamp, RecordId)>,

    /// Next id to hand out. Only ever grows.
    next_id: RecordId,
}

impl RecordTable {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_time: BTreeSet::new(),
            next_id: RecordId(1),
        }
    }

    /// Rebuild a table from replayed log entries.
    pub fn from_entries(entries: &[LogEntry]) -> Result<Self> {
        let mut table = Self::new();
        for entry in entries {
            table.apply(entry)?;
        }
        Ok(table)
    }

    /// Apply one logged mutation.
    pub fn apply(&mut self, entry: &LogEntry) -> Result<()> {
        match entry {
            LogEntry::Insert(record) => {
                if self.by_id.contains_key(&record.id) {
                    return Err(StoreError::Corruption(format!(
                        "duplicate insert of record {}",
                        record.id
                    )));
                }
                self.insert(record.clone());
            }
            LogEntry::Update(record) => {
                if self.update(record.clone()).is_none() {
                    return Err(StoreError::Corruption(format!(
                        "update of unknown record {}",
                        record.id
                    )));
                }
            }
            LogEntry::Delete(id) => {
                self.remove(*id);
            }
            LogEntry::Checkpoint { next_id } => {
                self.next_id = self.next_id.max(*next_id);
            }
        }
        Ok(())
    }

    /// The id the next insert will receive.
    pub fn next_id(&self) -> RecordId {
        self.next_id
    }

    pub fn insert(&mut self, record: Record) {
        self.next_id = self.next_id.max(record.id.next());
        self.by_time.insert((record.timestamp, record.id));
        self.by_id.insert(record.id, record);
    }

    /// Replace a record in place. Returns the previous version, or `None`
    /// (and changes nothing) if the id is unknown.
    pub fn update(&mut self, record: Record) -> Option<Record> {
        let previous = self.by_id.get_mut(&record.id)?;
        self.by_time.remove(&(previous.timestamp, previous.id));
        self.by_time.insert((record.timestamp, record.id));
        Some(std::mem::replace(previous, record))
    }

    pub fn remove(&mut self, id: RecordId) -> Option<Record> {
        let record = self.by_id.remove(&id)?;
        self.by_time.remove(&(record.timestamp, record.id));
        Some(record)
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All records, newest first. Equal timestamps come out highest id first.
    pub fn newest_first(&self) -> Vec<Record> {
        self.by_time
            .iter()
            .rev()
            .filter_map(|(_, id)| self.by_id.get(id).cloned())
            .collect()
    }

    /// The shortest log that reproduces this table.
    pub fn compacted_entries(&self) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(self.by_id.len() + 1);
        entries.push(LogEntry::Checkpoint {
            next_id: self.next_id,
        });

        let mut records: Vec<&Record> = self.by_id.values().collect();
        records.sort_by_key(|r| r.id);
        entries.extend(records.into_iter().cloned().map(LogEntry::Insert));
        entries
    }
}

impl Default for RecordTable {
    fn default() -> Self {
        Self::new()
    }
}
