//! CSV and PDF reports.
//!
//! Reports land in `<export dir>/BPLog/` as `yyyyMMdd_BPLog.<ext>`, dated by
//! `now` in the caller's time zone. A report file is either complete or
//! absent: content goes to a `.part` sibling first and is renamed into place.

mod csv;
mod pdf;

pub use self::csv::{render_csv, write_csv};
pub use self::pdf::{render_pdf, write_pdf, PdfReport};

use crate::types::Timestamp;
use chrono::{DateTime, TimeZone};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Subdirectory of the export directory that holds reports.
pub const EXPORT_SUBDIR: &str = "BPLog";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    #[error("Chart image too large: {width}x{height}")]
    ChartTooLarge { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Convert to a local date-time in `tz`.
pub(crate) fn local_time<Tz: TimeZone>(timestamp: Timestamp, tz: &Tz) -> Result<DateTime<Tz>> {
    tz.timestamp_millis_opt(timestamp.millis())
        .single()
        .ok_or(ExportError::InvalidTimestamp(timestamp.millis()))
}

/// Where a report made at `now` goes.
pub fn report_path<Tz: TimeZone>(
    export_dir: &Path,
    now: Timestamp,
    tz: &Tz,
    extension: &str,
) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let day = local_time(now, tz)?.format("%Y%m%d");
    Ok(export_dir
        .join(EXPORT_SUBDIR)
        .join(format!("{day}_BPLog.{extension}")))
}

/// Write `bytes` to `path` via a fsynced `.part` file and a rename.
/// Creates the parent directory. On error no `.part` file is left.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&part)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&part, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&part);
        return Err(e.into());
    }

    info!(path = %path.display(), bytes = bytes.len(), "report written");
    Ok(())
}
