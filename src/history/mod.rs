//! History screen state: the filtered list plus edit, delete and undo.

mod pipeline;
mod window;

pub use pipeline::{FilterPipeline, FilteredSnapshot, FilteredView, HistoryConfig};
pub use window::{TimeWindow, MILLIS_PER_DAY};

use crate::clock::Clock;
use crate::error::Result;
use crate::repository::Repository;
use crate::types::{Record, RecordInput};
use crate::writer::{PendingWrite, WriteOp, WriteOutcome, WriteQueue};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// The history list and its mutations.
///
/// Mutations go through the [`WriteQueue`] and show up in the list once the
/// store broadcasts them.
pub struct HistoryView {
    pipeline: FilterPipeline,
    writer: WriteQueue,
    /// Most recently deleted record, kept for one undo. Only set once the
    /// delete has actually removed it.
    last_deleted: Arc<Mutex<Option<Record>>>,
}

impl HistoryView {
    pub fn new(
        repository: Repository,
        writer: WriteQueue,
        clock: Arc<dyn Clock>,
        config: &HistoryConfig,
    ) -> Self {
        Self {
            pipeline: FilterPipeline::new(repository, clock, config),
            writer,
            last_deleted: Arc::new(Mutex::new(None)),
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.pipeline.window()
    }

    pub fn set_window(&self, window: TimeWindow) {
        debug!(%window, "history window selected");
        self.pipeline.set_window(window);
    }

    pub fn subscribe(&self) -> Result<FilteredView> {
        self.pipeline.subscribe()
    }

    /// The filtered list as of now.
    pub fn current(&self) -> FilteredSnapshot {
        self.pipeline.current()
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// Save an edited record. It keeps its id.
    pub fn update(&self, record: Record) -> Result<PendingWrite> {
        self.writer.submit(WriteOp::Update(record))
    }

    /// Delete a record. Once the delete has removed it, it is remembered
    /// for [`undo_delete`](Self::undo_delete).
    pub fn delete(&self, record: &Record) -> Result<PendingWrite> {
        let stash = Arc::clone(&self.last_deleted);
        let record = record.clone();

        self.writer
            .submit_inspect(WriteOp::Delete(record.id), move |result| {
                if let Ok(WriteOutcome::Deleted { existed: true, .. }) = result {
                    *stash.lock() = Some(record);
                }
            })
    }

    /// Re-insert the last deleted record. It gets a fresh id.
    /// Returns `None` if there is nothing to undo.
    pub fn undo_delete(&self) -> Result<Option<PendingWrite>> {
        let Some(record) = self.last_deleted.lock().take() else {
            return Ok(None);
        };

        match self.writer.submit(WriteOp::Insert(RecordInput::from(&record))) {
            Ok(pending) => Ok(Some(pending)),
            Err(e) => {
                // Keep it so the undo can be retried.
                *self.last_deleted.lock() = Some(record);
                Err(e)
            }
        }
    }

    /// Whether [`undo_delete`](Self::undo_delete) has something to restore.
    pub fn can_undo(&self) -> bool {
        self.last_deleted.lock().is_some()
    }
}

impl std::fmt::Debug for HistoryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryView")
            .field("pipeline", &self.pipeline)
            .field("can_undo", &self.can_undo())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Store, StoreConfig};
    use crate::types::{RecordId, Timestamp};
    use tempfile::TempDir;

    const NOW: Timestamp = Timestamp(500 * MILLIS_PER_DAY);

    fn setup(dir: &TempDir) -> (Arc<Store>, HistoryView) {
        let store = Arc::new(
            Store::create(StoreConfig {
                path: dir.path().join("store"),
                ..Default::default()
            })
            .unwrap(),
        );
        let repository = Repository::new(store.clone());
        let writer = WriteQueue::new(repository.clone()).unwrap();
        let history = HistoryView::new(
            repository,
            writer,
            Arc::new(ManualClock::new(NOW)),
            &HistoryConfig::default(),
        );
        (store, history)
    }

    #[test]
    fn test_update_keeps_id() {
        let dir = TempDir::new().unwrap();
        let (store, history) = setup(&dir);
        let id = store.insert(RecordInput::new(NOW, 120, 80, 70)).unwrap();

        let mut edited = store.get(id).unwrap();
        edited.systolic = 135;
        history.update(edited).unwrap().wait().unwrap();

        assert_eq!(store.get(id).unwrap().systolic, 135);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_delete_then_undo() {
        let dir = TempDir::new().unwrap();
        let (store, history) = setup(&dir);
        let id = store.insert(RecordInput::new(NOW, 128, 84, 66)).unwrap();
        let record = store.get(id).unwrap();

        history.delete(&record).unwrap().wait().unwrap();
        assert!(history.current().is_empty());
        assert!(history.can_undo());

        let outcome = history.undo_delete().unwrap().unwrap().wait().unwrap();
        let WriteOutcome::Inserted(new_id) = outcome else {
            panic!("expected insert outcome, got {:?}", outcome);
        };
        assert_ne!(new_id, id);

        let restored = store.get(new_id).unwrap();
        assert_eq!(RecordInput::from(&restored), RecordInput::from(&record));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_undo_with_nothing_deleted() {
        let dir = TempDir::new().unwrap();
        let (_store, history) = setup(&dir);
        assert!(history.undo_delete().unwrap().is_none());
    }

    #[test]
    fn test_undo_restores_only_the_latest_delete() {
        let dir = TempDir::new().unwrap();
        let (store, history) = setup(&dir);
        let a = store.insert(RecordInput::new(NOW, 110, 70, 60)).unwrap();
        let b = store.insert(RecordInput::new(NOW, 150, 95, 90)).unwrap();

        history.delete(&store.get(a).unwrap()).unwrap().wait().unwrap();
        history.delete(&store.get(b).unwrap()).unwrap().wait().unwrap();

        history.undo_delete().unwrap().unwrap().wait().unwrap();
        assert!(history.undo_delete().unwrap().is_none());

        let remaining = store.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.records[0].systolic, 150);
        assert_eq!(remaining.records[0].id, RecordId(3));
    }

    #[test]
    fn test_delete_of_missing_record_leaves_nothing_to_undo() {
        let dir = TempDir::new().unwrap();
        let (store, history) = setup(&dir);
        let id = store.insert(RecordInput::new(NOW, 120, 80, 70)).unwrap();
        let record = store.get(id).unwrap();
        store.delete(id).unwrap();

        let outcome = history.delete(&record).unwrap().wait().unwrap();
        assert_eq!(outcome, WriteOutcome::Deleted { id, existed: false });
        assert!(!history.can_undo());
        assert!(history.undo_delete().unwrap().is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_window_selection() {
        let dir = TempDir::new().unwrap();
        let (store, history) = setup(&dir);
        store
            .insert(RecordInput::new(NOW.saturating_sub_millis(10 * MILLIS_PER_DAY), 120, 80, 70))
            .unwrap();

        assert!(history.current().is_empty());
        history.set_window(TimeWindow::Days30);
        assert_eq!(history.window(), TimeWindow::Days30);
        assert_eq!(history.current().len(), 1);
    }
}
