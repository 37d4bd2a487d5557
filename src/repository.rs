//! Repository over a [`RecordStore`].
//!
//! Consumers (history, entry form, background writer) talk to this instead
//! of a concrete store.

use crate::error::Result;
use crate::store::{LiveView, RecordStore, RecordsSnapshot};
use crate::types::{Record, RecordId, RecordInput};
use std::sync::Arc;

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn RecordStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn insert(&self, input: RecordInput) -> Result<RecordId> {
        self.store.insert(input)
    }

    pub fn update(&self, record: &Record) -> Result<()> {
        self.store.update(record)
    }

    pub fn delete(&self, id: RecordId) -> Result<bool> {
        self.store.delete(id)
    }

    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.store.get(id)
    }

    pub fn snapshot(&self) -> RecordsSnapshot {
        self.store.snapshot()
    }

    pub fn observe_all_by_time_descending(&self) -> LiveView {
        self.store.observe_all_by_time_descending()
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}
