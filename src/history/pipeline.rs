//! Time-windowed view over the store's live record list.
//!
//! One worker thread per pipeline holds the upstream store subscription and
//! re-derives the filtered list whenever the records or the window change.
//! The worker only exists while someone is subscribed: after the last
//! subscriber leaves it waits out a grace period, releases the upstream and
//! exits. The next subscriber starts a fresh one.

use super::window::TimeWindow;
use crate::clock::Clock;
use crate::error::{Result, StoreError};
use crate::repository::Repository;
use crate::store::{LiveView, RecordsSnapshot};
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use crate::types::{Record, Timestamp};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// History view configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Window selected when a session starts. Not persisted.
    pub default_window: TimeWindow,

    /// How long the upstream subscription outlives the last subscriber.
    pub grace_period_ms: u64,

    /// Buffered snapshots per subscriber.
    pub buffer_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_window: TimeWindow::default(),
            grace_period_ms: 5_000,
            buffer_size: SubscriptionConfig::default().buffer_size,
        }
    }
}

impl HistoryConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// The records inside the selected window, newest first.
#[derive(Clone, Debug)]
pub struct FilteredSnapshot {
    /// Version of the store snapshot this was derived from.
    pub source_version: u64,
    pub window: TimeWindow,
    /// The `now` the cutoff was computed against.
    pub derived_at: Timestamp,
    pub records: Arc<Vec<Record>>,
}

impl FilteredSnapshot {
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

/// Live subscription to a [`FilterPipeline`].
pub type FilteredView = SubscriptionHandle<FilteredSnapshot>;

enum Control {
    /// A new subscriber. It must not see data older than `floor`.
    Attached { id: SubscriptionId, floor: u64 },
    WindowChanged,
}

struct WorkerLink {
    control: Sender<Control>,
    thread: JoinHandle<()>,
}

struct Shared {
    repository: Repository,
    clock: Arc<dyn Clock>,
    window: RwLock<TimeWindow>,
    subscribers: SubscriptionManager<FilteredSnapshot>,
    /// `Some` exactly while a worker is running. Attach and worker exit both
    /// decide under this lock.
    worker: Mutex<Option<WorkerLink>>,
    /// Thread of a worker that released the upstream and is exiting.
    retired: Mutex<Option<JoinHandle<()>>>,
    grace_period: Duration,
}

impl Shared {
    /// Filter a store snapshot with the current window. `now` is sampled on
    /// every call, so the window slides even without data changes.
    fn derive(&self, source: &RecordsSnapshot) -> FilteredSnapshot {
        let window = *self.window.read();
        let now = self.clock.now();

        FilteredSnapshot {
            source_version: source.version,
            window,
            derived_at: now,
            records: Arc::new(window.apply(&source.records, now)),
        }
    }
}

/// Combines the store's live list with the selected [`TimeWindow`].
pub struct FilterPipeline {
    shared: Arc<Shared>,
}

impl FilterPipeline {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, config: &HistoryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                repository,
                clock,
                window: RwLock::new(config.default_window),
                subscribers: SubscriptionManager::with_config(SubscriptionConfig {
                    buffer_size: config.buffer_size,
                }),
                worker: Mutex::new(None),
                retired: Mutex::new(None),
                grace_period: config.grace_period(),
            }),
        }
    }

    pub fn window(&self) -> TimeWindow {
        *self.shared.window.read()
    }

    /// Select a window. Takes effect for every derivation from now on;
    /// attached subscribers get a re-derived list if it actually changed.
    pub fn set_window(&self, window: TimeWindow) {
        {
            let mut current = self.shared.window.write();
            if *current == window {
                return;
            }
            *current = window;
        }

        if let Some(link) = self.shared.worker.lock().as_ref() {
            let _ = link.control.send(Control::WindowChanged);
        }
    }

    /// Subscribe to the filtered list. The first item reflects the current
    /// records and window.
    pub fn subscribe(&self) -> Result<FilteredView> {
        let mut worker = self.shared.worker.lock();
        let floor = self.shared.repository.snapshot().version;
        let handle = self.shared.subscribers.subscribe();
        let id = handle.id();

        let attached = worker
            .as_ref()
            .is_some_and(|link| link.control.send(Control::Attached { id, floor }).is_ok());

        if !attached {
            *worker = Some(Self::spawn_worker(&self.shared, id)?);
        }

        Ok(handle)
    }

    /// Derive the filtered list right now, without subscribing.
    pub fn current(&self) -> FilteredSnapshot {
        self.shared.derive(&self.shared.repository.snapshot())
    }

    /// Whether the upstream store subscription is currently held.
    pub fn is_upstream_attached(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.subscription_count()
    }

    /// Start a worker serving `first`. Its initial upstream snapshot is
    /// current, so `first` needs no floor.
    fn spawn_worker(shared: &Arc<Shared>, first: SubscriptionId) -> Result<WorkerLink> {
        let previous = shared.retired.lock().take();
        if let Some(thread) = previous {
            let _ = thread.join();
        }

        let upstream = shared.repository.observe_all_by_time_descending();
        let (control, control_rx) = unbounded();
        let worker_shared = Arc::clone(shared);

        let thread = thread::Builder::new()
            .name("bplog-history".into())
            .spawn(move || run(worker_shared, upstream, control_rx, first))
            .map_err(|e| StoreError::Spawn(e.to_string()))?;

        debug!("history worker attached upstream");
        Ok(WorkerLink { control, thread })
    }
}

impl Drop for FilterPipeline {
    fn drop(&mut self) {
        let link = self.shared.worker.lock().take();
        if let Some(WorkerLink { control, thread }) = link {
            // Disconnecting the control channel stops the worker.
            drop(control);
            let _ = thread.join();
        }
        let retired = self.shared.retired.lock().take();
        if let Some(thread) = retired {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("window", &self.window())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn idle_tick(grace_period: Duration) -> Duration {
    (grace_period / 4).clamp(Duration::from_millis(5), Duration::from_millis(250))
}

/// Send a derivation of `snapshot` to every member whose floor it meets.
/// Members whose handle is gone are forgotten.
fn fan_out(
    shared: &Shared,
    members: &mut HashMap<SubscriptionId, u64>,
    snapshot: &RecordsSnapshot,
) {
    let eligible: Vec<SubscriptionId> = members
        .iter()
        .filter(|(_, floor)| snapshot.version >= **floor)
        .map(|(id, _)| *id)
        .collect();
    if eligible.is_empty() {
        return;
    }

    let filtered = shared.derive(snapshot);
    for id in eligible {
        if !shared.subscribers.send_to(id, filtered.clone()) {
            members.remove(&id);
        }
    }
}

fn run(
    shared: Arc<Shared>,
    upstream: LiveView,
    control: Receiver<Control>,
    first: SubscriptionId,
) {
    let tick = idle_tick(shared.grace_period);
    let mut latest: Option<RecordsSnapshot> = None;
    // Subscribers this worker serves, with the oldest store version each may
    // see. Nothing reaches a subscriber before its `Attached` is handled.
    let mut members: HashMap<SubscriptionId, u64> = HashMap::from([(first, 0)]);
    let mut idle_since: Option<Instant> = None;

    loop {
        select! {
            recv(upstream.receiver()) -> msg => match msg {
                Ok(snapshot) => {
                    // Skip snapshots that are already superseded.
                    let snapshot = upstream.latest().unwrap_or(snapshot);
                    fan_out(&shared, &mut members, &snapshot);
                    latest = Some(snapshot);
                }
                Err(_) => break,
            },
            recv(control) -> msg => match msg {
                Ok(Control::Attached { id, floor }) => {
                    members.insert(id, floor);
                    if let Some(snapshot) = latest.as_ref().filter(|s| s.version >= floor) {
                        if !shared.subscribers.send_to(id, shared.derive(snapshot)) {
                            members.remove(&id);
                        }
                    }
                }
                Ok(Control::WindowChanged) => {
                    if let Some(snapshot) = &latest {
                        fan_out(&shared, &mut members, snapshot);
                    }
                }
                Err(_) => break,
            },
            default(tick) => {}
        }

        if shared.subscribers.subscription_count() > 0 {
            idle_since = None;
            continue;
        }

        members.clear();
        let since = *idle_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= shared.grace_period {
            let mut slot = shared.worker.lock();
            if shared.subscribers.subscription_count() == 0 {
                if let Some(link) = slot.take() {
                    *shared.retired.lock() = Some(link.thread);
                }
                break;
            }
            idle_since = None;
        }
    }

    debug!("history worker released upstream");
}
