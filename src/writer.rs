//! Background write queue.
//!
//! Mutations may block on disk, so callers on an interactive thread hand
//! them to a single worker and carry on. Results come back through a
//! [`PendingWrite`] or a completion callback; the live view picks up the
//! change either way.

use crate::error::{Result, StoreError};
use crate::repository::Repository;
use crate::types::{Record, RecordId, RecordInput};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// A mutation to run in the background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Insert(RecordInput),
    Update(Record),
    Delete(RecordId),
}

/// What a completed [`WriteOp`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted(RecordId),
    Updated(RecordId),
    Deleted { id: RecordId, existed: bool },
}

type Completion = Box<dyn FnOnce(Result<WriteOutcome>) + Send + 'static>;

enum WriterCommand {
    Apply { op: WriteOp, done: Completion },
    Shutdown,
}

struct WriteQueueInner {
    sender: Sender<WriterCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for WriteQueueInner {
    fn drop(&mut self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        // Queued ops are ahead of the shutdown marker and still run.
        if self.sender.send(WriterCommand::Shutdown).is_err() {
            error!("failed to send shutdown to writer thread");
        }

        // A completion callback may hold the last clone; never join ourselves.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if let Err(join_err) = handle.join() {
            error!("failed to join writer thread: {join_err:?}");
        }
    }
}

/// Single-worker queue that applies mutations in submission order.
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<WriteQueueInner>,
}

impl WriteQueue {
    pub fn new(repository: Repository) -> Result<Self> {
        let (sender, receiver) = unbounded::<WriterCommand>();

        let worker = thread::Builder::new()
            .name("bplog-writer".into())
            .spawn(move || Self::run(repository, receiver))
            .map_err(|e| StoreError::Spawn(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(WriteQueueInner {
                sender,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Enqueue a mutation. Dropping the returned handle makes it
    /// fire-and-forget; the op still runs.
    pub fn submit(&self, op: WriteOp) -> Result<PendingWrite> {
        self.submit_inspect(op, |_| {})
    }

    /// Like [`submit`](Self::submit), but `inspect` sees the result on the
    /// worker before the [`PendingWrite`] is completed.
    pub fn submit_inspect<F>(&self, op: WriteOp, inspect: F) -> Result<PendingWrite>
    where
        F: FnOnce(&Result<WriteOutcome>) + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.submit_with(op, move |result| {
            inspect(&result);
            let _ = reply_tx.send(result);
        })?;
        Ok(PendingWrite { receiver: reply_rx })
    }

    /// Enqueue a mutation and run `on_complete` on the worker once it is done.
    pub fn submit_with<F>(&self, op: WriteOp, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<WriteOutcome>) + Send + 'static,
    {
        self.inner
            .sender
            .send(WriterCommand::Apply {
                op,
                done: Box::new(on_complete),
            })
            .map_err(|_| StoreError::WriterClosed)
    }

    fn run(repository: Repository, receiver: Receiver<WriterCommand>) {
        while let Ok(command) = receiver.recv() {
            match command {
                WriterCommand::Apply { op, done } => {
                    let result = Self::apply(&repository, op);
                    if let Err(e) = &result {
                        error!(error = %e, "background write failed");
                    }
                    done(result);
                }
                WriterCommand::Shutdown => break,
            }
        }

        debug!("writer thread shutting down");
    }

    fn apply(repository: &Repository, op: WriteOp) -> Result<WriteOutcome> {
        match op {
            WriteOp::Insert(input) => repository.insert(input).map(WriteOutcome::Inserted),
            WriteOp::Update(record) => {
                repository.update(&record)?;
                Ok(WriteOutcome::Updated(record.id))
            }
            WriteOp::Delete(id) => {
                let existed = repository.delete(id)?;
                Ok(WriteOutcome::Deleted { id, existed })
            }
        }
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue").finish_non_exhaustive()
    }
}

/// Completion of a submitted write.
#[derive(Debug)]
pub struct PendingWrite {
    receiver: Receiver<Result<WriteOutcome>>,
}

impl PendingWrite {
    /// Block until the write has run.
    pub fn wait(self) -> Result<WriteOutcome> {
        self.receiver.recv().map_err(|_| StoreError::WriterClosed)?
    }

    /// Block for at most `timeout`. `None` means the write has not run yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<WriteOutcome>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StoreError::WriterClosed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreConfig};
    use crate::types::Timestamp;
    use tempfile::TempDir;

    fn test_queue(dir: &TempDir) -> (Arc<Store>, WriteQueue) {
        let store = Arc::new(
            Store::create(StoreConfig {
                path: dir.path().join("store"),
                ..Default::default()
            })
            .unwrap(),
        );
        let queue = WriteQueue::new(Repository::new(store.clone())).unwrap();
        (store, queue)
    }

    fn reading(timestamp: i64) -> RecordInput {
        RecordInput::new(Timestamp(timestamp), 120, 80, 70)
    }

    #[test]
    fn test_submit_and_wait() {
        let dir = TempDir::new().unwrap();
        let (store, queue) = test_queue(&dir);

        let outcome = queue.submit(WriteOp::Insert(reading(100))).unwrap().wait().unwrap();
        let WriteOutcome::Inserted(id) = outcome else {
            panic!("expected insert outcome, got {:?}", outcome);
        };
        assert!(store.get(id).is_some());
    }

    #[test]
    fn test_ops_run_in_order() {
        let dir = TempDir::new().unwrap();
        let (store, queue) = test_queue(&dir);

        for i in 0..20 {
            queue.submit(WriteOp::Insert(reading(i))).unwrap();
        }
        let last = queue.submit(WriteOp::Delete(RecordId(1))).unwrap();

        assert_eq!(
            last.wait().unwrap(),
            WriteOutcome::Deleted {
                id: RecordId(1),
                existed: true
            }
        );
        assert_eq!(store.snapshot().len(), 19);
    }

    #[test]
    fn test_failure_reaches_completion() {
        let dir = TempDir::new().unwrap();
        let (_store, queue) = test_queue(&dir);

        let ghost = reading(1).into_record(RecordId(77));
        let result = queue.submit(WriteOp::Update(ghost)).unwrap().wait();

        assert!(matches!(result, Err(StoreError::RecordNotFound(RecordId(77)))));
    }

    #[test]
    fn test_inspect_runs_before_reply() {
        let dir = TempDir::new().unwrap();
        let (_store, queue) = test_queue(&dir);

        let seen = Arc::new(Mutex::new(None));
        let hook = seen.clone();
        let pending = queue
            .submit_inspect(WriteOp::Delete(RecordId(5)), move |result| {
                *hook.lock() = Some(result.is_ok());
            })
            .unwrap();

        pending.wait().unwrap();
        assert_eq!(*seen.lock(), Some(true));
    }

    #[test]
    fn test_wait_timeout() {
        let dir = TempDir::new().unwrap();
        let (_store, queue) = test_queue(&dir);

        // Hold the worker inside a completion until released.
        let (release_tx, release_rx) = bounded::<()>(0);
        queue
            .submit_with(WriteOp::Insert(reading(1)), move |_| {
                let _ = release_rx.recv();
            })
            .unwrap();

        let pending = queue.submit(WriteOp::Insert(reading(2))).unwrap();
        assert!(pending.wait_timeout(Duration::from_millis(30)).is_none());

        release_tx.send(()).unwrap();
        let outcome = pending.wait_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(matches!(outcome, WriteOutcome::Inserted(RecordId(2))));
    }

    #[test]
    fn test_wait_timeout_after_worker_gone() {
        let (reply_tx, receiver) = bounded::<Result<WriteOutcome>>(1);
        drop(reply_tx);
        let pending = PendingWrite { receiver };

        let result = pending.wait_timeout(Duration::from_millis(10)).unwrap();
        assert!(matches!(result, Err(StoreError::WriterClosed)));
    }

    #[test]
    fn test_drop_drains_queue() {
        let dir = TempDir::new().unwrap();
        let (store, queue) = test_queue(&dir);

        for i in 0..10 {
            queue.submit(WriteOp::Insert(reading(i))).unwrap();
        }
        drop(queue);

        assert_eq!(store.snapshot().len(), 10);
    }
}
