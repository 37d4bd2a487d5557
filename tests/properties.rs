//! Property tests: the live view always matches a simple model.

use bplog::history::MILLIS_PER_DAY;
use bplog::{Record, RecordId, RecordInput, Store, StoreConfig, TimeWindow, Timestamp};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Debug)]
enum Op {
    Insert { timestamp: i64, sys: u32 },
    /// Update the n-th live record (modulo the live count).
    Update { pick: usize, timestamp: i64 },
    /// Delete the n-th id ever handed out, live or not.
    Delete { pick: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..1_000, 60u32..200).prop_map(|(timestamp, sys)| Op::Insert { timestamp, sys }),
        1 => (any::<usize>(), 0i64..1_000).prop_map(|(pick, timestamp)| Op::Update { pick, timestamp }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn sorted_model(model: &BTreeMap<RecordId, Record>) -> Vec<Record> {
    let mut records: Vec<Record> = model.values().cloned().collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    records
}

fn assert_matches_model(actual: &[Record], model: &BTreeMap<RecordId, Record>) {
    assert!(actual.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let mut by_id: Vec<Record> = actual.to_vec();
    by_id.sort_by_key(|r| r.id);
    let expected: Vec<Record> = model.values().cloned().collect();
    assert_eq!(by_id, expected);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    /// After every mutation the live view holds exactly the current records,
    /// newest first, and the same holds after reopening.
    #[test]
    fn prop_live_view_matches_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        };

        let mut model: BTreeMap<RecordId, Record> = BTreeMap::new();
        let mut issued: Vec<RecordId> = Vec::new();

        {
            let store = Store::create(config.clone()).unwrap();
            let live = store.observe_all_by_time_descending();
            let mut last_version = live.recv_timeout(Duration::from_secs(1)).unwrap().version;

            for op in ops {
                let changed = match op {
                    Op::Insert { timestamp, sys } => {
                        let input = RecordInput::new(Timestamp(timestamp), sys, 80, 70);
                        let id = store.insert(input.clone()).unwrap();
                        prop_assert!(issued.iter().all(|old| *old < id));
                        issued.push(id);
                        model.insert(id, input.into_record(id));
                        true
                    }
                    Op::Update { pick, timestamp } => {
                        if model.is_empty() {
                            false
                        } else {
                            let id = *model.keys().nth(pick % model.len()).unwrap();
                            let mut record = model[&id].clone();
                            record.timestamp = Timestamp(timestamp);
                            record.pulse += 1;
                            store.update(&record).unwrap();
                            model.insert(id, record);
                            true
                        }
                    }
                    Op::Delete { pick } => {
                        if issued.is_empty() {
                            false
                        } else {
                            let id = issued[pick % issued.len()];
                            let existed = store.delete(id).unwrap();
                            prop_assert_eq!(existed, model.remove(&id).is_some());
                            existed
                        }
                    }
                };

                if changed {
                    let snapshot = live.recv_timeout(Duration::from_secs(1)).unwrap();
                    prop_assert_eq!(snapshot.version, last_version + 1);
                    last_version = snapshot.version;
                    assert_matches_model(&snapshot.records, &model);
                } else {
                    prop_assert!(live.try_recv().is_err());
                }
            }
        }

        let reopened = Store::open(config).unwrap();
        assert_matches_model(&reopened.snapshot().records, &model);
    }

    /// Filtering keeps exactly the records at or after the cutoff, in order.
    #[test]
    fn prop_window_is_an_ordered_subsequence(
        offsets in prop::collection::vec(0i64..60, 0..40),
        window in prop_oneof![
            Just(TimeWindow::Days7),
            Just(TimeWindow::Days30),
            Just(TimeWindow::All),
        ],
    ) {
        let now = Timestamp(1_000 * MILLIS_PER_DAY);
        let mut model = BTreeMap::new();
        for (i, days) in offsets.iter().enumerate() {
            let id = RecordId(i as u64 + 1);
            let input = RecordInput::new(now.saturating_sub_millis(days * MILLIS_PER_DAY / 2), 120, 80, 70);
            model.insert(id, input.into_record(id));
        }
        let list = sorted_model(&model);

        let filtered = window.apply(&list, now);

        let expected: Vec<Record> = match window.days() {
            None => list.clone(),
            Some(days) => list
                .iter()
                .filter(|r| now.millis() - r.timestamp.millis() <= days * MILLIS_PER_DAY)
                .cloned()
                .collect(),
        };
        prop_assert_eq!(filtered, expected);
    }
}
