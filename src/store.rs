//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::records::{LogEntry, MutationLog, RecordTable};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionManager};
use crate::types::{Record, RecordId, RecordInput, StoreStats};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the log every N writes. 1 syncs every write.
    pub sync_interval: u64,

    /// Buffered snapshots per live-view subscriber.
    pub live_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./bplog-store"),
            create_if_missing: true,
            sync_interval: 1,
            live_buffer_size: SubscriptionConfig::default().buffer_size,
        }
    }
}

/// The full record list at one point in time, newest first.
#[derive(Clone, Debug)]
pub struct RecordsSnapshot {
    /// Bumped once per effective mutation.
    pub version: u64,
    pub records: Arc<Vec<Record>>,
}

impl RecordsSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            records: Arc::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
}

/// Live subscription to the ordered record list.
pub type LiveView = SubscriptionHandle<RecordsSnapshot>;

/// Durable record storage with a live, newest-first view.
///
/// Implemented by [`Store`]; tests substitute their own implementations.
pub trait RecordStore: Send + Sync {
    /// Persist a new record and return the id assigned to it.
    fn insert(&self, input: RecordInput) -> Result<RecordId>;

    /// Replace the stored fields of `record.id`.
    ///
    /// Fails with [`StoreError::RecordNotFound`] if no such record exists.
    fn update(&self, record: &Record) -> Result<()>;

    /// Remove a record. Returns false if it was already gone.
    fn delete(&self, id: RecordId) -> Result<bool>;

    fn get(&self, id: RecordId) -> Option<Record>;

    /// The current ordered list.
    fn snapshot(&self) -> RecordsSnapshot;

    /// Subscribe to the ordered list. The current list is delivered
    /// immediately, then a new one after every change.
    fn observe_all_by_time_descending(&self) -> LiveView;
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"BPL\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const LOG_FILE: &str = "records.log";

/// The main record store.
///
/// Provides a unified interface for:
/// - Inserting, updating and deleting records durably
/// - Reading the records newest first
/// - Subscribing to every change of that list
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Durable mutation log.
    log: MutationLog,

    /// Live records.
    table: RwLock<RecordTable>,

    /// Cached ordered list, rebuilt after each mutation.
    current: RwLock<RecordsSnapshot>,

    /// Live view subscribers.
    subscriptions: SubscriptionManager<RecordsSnapshot>,

    /// Lock for write operations to ensure atomicity.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        Self::write_manifest(&config.path)?;

        // A leftover log from an earlier store in this directory is kept.
        let (log, entries) = MutationLog::open(config.path.join(LOG_FILE), config.sync_interval)?;
        let table = RecordTable::from_entries(&entries)?;

        info!(path = %config.path.display(), records = table.len(), "created record store");

        Ok(Self::assemble(config, lock_file, log, table))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, entries) = MutationLog::open(config.path.join(LOG_FILE), config.sync_interval)?;
        let table = RecordTable::from_entries(&entries)?;

        info!(
            path = %config.path.display(),
            records = table.len(),
            log_entries = entries.len(),
            "opened record store"
        );

        Ok(Self::assemble(config, lock_file, log, table))
    }

    fn assemble(config: StoreConfig, lock_file: File, log: MutationLog, table: RecordTable) -> Self {
        let current = RecordsSnapshot {
            version: 0,
            records: Arc::new(table.newest_first()),
        };
        let subscriptions = SubscriptionManager::with_config(SubscriptionConfig {
            buffer_size: config.live_buffer_size,
        });

        Self {
            config,
            _lock_file: lock_file,
            log,
            table: RwLock::new(table),
            current: RwLock::new(current),
            subscriptions,
            write_lock: Mutex::new(()),
        }
    }

    // --- Record Operations ---

    /// Insert a new record, assigning it a fresh id.
    pub fn insert(&self, input: RecordInput) -> Result<RecordId> {
        let _lock = self.write_lock.lock();

        let id = self.table.read().next_id();
        let record = input.into_record(id);
        self.commit(LogEntry::Insert(record))?;

        debug!(%id, "inserted record");
        Ok(id)
    }

    /// Replace the stored fields of an existing record.
    pub fn update(&self, record: &Record) -> Result<()> {
        let _lock = self.write_lock.lock();

        if self.table.read().get(record.id).is_none() {
            return Err(StoreError::RecordNotFound(record.id));
        }
        self.commit(LogEntry::Update(record.clone()))?;

        debug!(id = %record.id, "updated record");
        Ok(())
    }

    /// Delete a record. Deleting a missing record is a no-op returning false.
    pub fn delete(&self, id: RecordId) -> Result<bool> {
        let _lock = self.write_lock.lock();

        if self.table.read().get(id).is_none() {
            return Ok(false);
        }
        self.commit(LogEntry::Delete(id))?;

        debug!(%id, "deleted record");
        Ok(true)
    }

    /// Get a record by ID.
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.table.read().get(id).cloned()
    }

    /// The current list, newest first.
    pub fn snapshot(&self) -> RecordsSnapshot {
        self.current.read().clone()
    }

    /// Subscribe to the newest-first list.
    ///
    /// Registration and the initial delivery happen under the write lock, so
    /// no mutation can fall between them.
    pub fn observe_all_by_time_descending(&self) -> LiveView {
        let _lock = self.write_lock.lock();

        let handle = self.subscriptions.subscribe();
        self.subscriptions.send_to(handle.id(), self.snapshot());
        handle
    }

    /// Number of attached live views.
    pub fn live_view_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    /// Log first, then memory, then subscribers. Caller holds the write lock.
    fn commit(&self, entry: LogEntry) -> Result<()> {
        self.log.append(&entry)?;

        let records = {
            let mut table = self.table.write();
            table.apply(&entry)?;
            table.newest_first()
        };

        let snapshot = {
            let mut current = self.current.write();
            *current = RecordsSnapshot {
                version: current.version + 1,
                records: Arc::new(records),
            };
            current.clone()
        };

        self.subscriptions.broadcast(snapshot);
        Ok(())
    }

    // --- Maintenance ---

    /// Rewrite the log so it holds only the live records.
    ///
    /// The live view does not change, so nothing is broadcast.
    pub fn compact(&self) -> Result<()> {
        let _lock = self.write_lock.lock();

        let before = self.log.size();
        let entries = self.table.read().compacted_entries();
        self.log.rewrite(&entries)?;

        info!(
            before_bytes = before,
            after_bytes = self.log.size(),
            records = entries.len() - 1,
            "compacted mutation log"
        );
        Ok(())
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            record_count: self.table.read().len() as u64,
            log_entries: self.log.entry_count(),
            log_size_bytes: self.log.size(),
        }
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl RecordStore for Store {
    fn insert(&self, input: RecordInput) -> Result<RecordId> {
        Store::insert(self, input)
    }

    fn update(&self, record: &Record) -> Result<()> {
        Store::update(self, record)
    }

    fn delete(&self, id: RecordId) -> Result<bool> {
        Store::delete(self, id)
    }

    fn get(&self, id: RecordId) -> Option<Record> {
        Store::get(self, id)
    }

    fn snapshot(&self) -> RecordsSnapshot {
        Store::snapshot(self)
    }

    fn observe_all_by_time_descending(&self) -> LiveView {
        Store::observe_all_by_time_descending(self)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        }
    }

    fn reading(timestamp: i64, systolic: u32) -> RecordInput {
        RecordInput::new(Timestamp(timestamp), systolic, 80, 70)
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        assert!(store.path().join("MANIFEST").exists());
        assert!(store.path().join("records.log").exists());
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        let first = store.insert(reading(100, 120)).unwrap();
        let second = store.insert(reading(50, 130)).unwrap();

        assert_eq!(first, RecordId(1));
        assert_eq!(second, RecordId(2));
        assert_eq!(store.get(second).unwrap().systolic, 130);
    }

    #[test]
    fn test_snapshot_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        store.insert(reading(200, 1)).unwrap();
        store.insert(reading(300, 2)).unwrap();
        store.insert(reading(100, 3)).unwrap();

        let systolic: Vec<_> = store.snapshot().iter().map(|r| r.systolic).collect();
        assert_eq!(systolic, vec![2, 1, 3]);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        let ghost = reading(100, 120).into_record(RecordId(42));
        let result = store.update(&ghost);

        assert!(matches!(result, Err(StoreError::RecordNotFound(RecordId(42)))));
        assert_eq!(store.stats().log_entries, 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        let id = store.insert(reading(100, 120)).unwrap();
        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());

        assert!(store.snapshot().is_empty());
        assert_eq!(store.stats().log_entries, 2);
    }

    #[test]
    fn test_live_view_receives_current_then_changes() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();
        store.insert(reading(100, 120)).unwrap();

        let view = store.observe_all_by_time_descending();
        let initial = view.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(initial.len(), 1);

        store.insert(reading(200, 130)).unwrap();
        let next = view.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next.version, initial.version + 1);
        assert_eq!(next.records[0].systolic, 130);
    }

    #[test]
    fn test_noop_delete_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        let view = store.observe_all_by_time_descending();
        view.recv_timeout(Duration::from_millis(100)).unwrap();

        store.delete(RecordId(99)).unwrap();
        assert!(view.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = Store::create(config.clone()).unwrap();
            let a = store.insert(reading(100, 120)).unwrap();
            let b = store.insert(reading(200, 130)).unwrap();

            let mut edited = store.get(a).unwrap();
            edited.pulse = 99;
            store.update(&edited).unwrap();
            store.delete(b).unwrap();
        }

        let store = Store::open(config).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records[0].pulse, 99);

        // Deleted id 2 is not handed out again
        assert_eq!(store.insert(reading(300, 140)).unwrap(), RecordId(3));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store1 = Store::create(config.clone()).unwrap();

        // Second store should fail to acquire lock
        let result = Store::open(config);
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_open_or_create_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };

        let result = Store::open_or_create(config);
        assert!(matches!(result, Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_compact() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = Store::create(config.clone()).unwrap();
            for i in 0..10 {
                let id = store.insert(reading(i, 120)).unwrap();
                if i % 2 == 0 {
                    store.delete(id).unwrap();
                }
            }
            let before = store.stats();
            store.compact().unwrap();
            let after = store.stats();

            assert_eq!(after.record_count, 5);
            assert_eq!(after.log_entries, 6);
            assert!(after.log_size_bytes < before.log_size_bytes);
        }

        let store = Store::open(config).unwrap();
        assert_eq!(store.snapshot().len(), 5);
        assert_eq!(store.insert(reading(99, 120)).unwrap(), RecordId(11));
    }
}
