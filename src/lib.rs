//! # BPLog
//!
//! A durable store of blood-pressure measurements with live views.
//!
//! ## Core Concepts
//!
//! - **Store**: Records kept in an append-only mutation log, replayed into an
//!   in-memory table ordered by timestamp
//! - **Live views**: Subscriptions that receive the whole newest-first list
//!   after every change
//! - **History**: The live list cut down to a sliding time window
//! - **Entry form**: A draft measurement validated and saved in the background
//! - **Export**: CSV of all records, PDF of the selected window
//!
//! ## Example
//!
//! ```ignore
//! use bplog::{AppConfig, Session, TimeWindow};
//!
//! let session = Session::open(AppConfig::default())?;
//!
//! let form = session.form();
//! form.edit_sys("120");
//! form.edit_dia("80");
//! form.edit_pulse("70");
//! form.submit()?;
//!
//! let history = session.history().subscribe()?;
//! session.history().set_window(TimeWindow::Days30);
//! let latest = history.recv()?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod form;
pub mod history;
pub mod records;
pub mod repository;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod writer;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use error::{Result, StoreError};
pub use export::{ExportError, PdfReport};
pub use form::{Draft, EntryForm, Field, FormError, FormEvent, ValidationError};
pub use history::{
    FilterPipeline, FilteredSnapshot, FilteredView, HistoryConfig, HistoryView, TimeWindow,
};
pub use records::{LogEntry, MutationLog, RecordTable};
pub use repository::Repository;
pub use session::Session;
pub use store::{LiveView, RecordStore, RecordsSnapshot, Store, StoreConfig};
pub use subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
pub use writer::{PendingWrite, WriteOp, WriteOutcome, WriteQueue};
