//! Time windows for the history view.

use crate::types::{Record, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// How far back the history view reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    #[default]
    Days7,
    Days30,
    All,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 3] = [TimeWindow::Days7, TimeWindow::Days30, TimeWindow::All];

    pub fn days(self) -> Option<i64> {
        match self {
            TimeWindow::Days7 => Some(7),
            TimeWindow::Days30 => Some(30),
            TimeWindow::All => None,
        }
    }

    /// Display label, also used as the PDF report title suffix.
    pub fn label(self) -> &'static str {
        match self {
            TimeWindow::Days7 => "7 days",
            TimeWindow::Days30 => "30 days",
            TimeWindow::All => "All",
        }
    }

    /// Oldest timestamp still inside the window, or `None` for no limit.
    pub fn cutoff(self, now: Timestamp) -> Option<Timestamp> {
        self.days()
            .map(|days| now.saturating_sub_millis(days * MILLIS_PER_DAY))
    }

    pub fn contains(self, timestamp: Timestamp, now: Timestamp) -> bool {
        self.cutoff(now).is_none_or(|cutoff| timestamp >= cutoff)
    }

    /// Keep the records inside the window, preserving their order.
    pub fn apply(self, records: &[Record], now: Timestamp) -> Vec<Record> {
        match self.cutoff(now) {
            None => records.to_vec(),
            Some(cutoff) => records
                .iter()
                .filter(|r| r.timestamp >= cutoff)
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
