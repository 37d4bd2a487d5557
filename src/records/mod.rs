//! Record persistence.
//!
//! Mutations are written to an append-only log and mirrored in an in-memory
//! table ordered by time.

mod log;
mod table;

pub use log::{LogEntry, MutationLog};
pub use table::RecordTable;
