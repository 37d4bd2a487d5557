use super::{local_time, report_path, write_atomic, Result};
use crate::types::{Record, Timestamp};
use chrono::{TimeZone, Timelike};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const HEADER: &str = "timestamp,date,time,sys,dia,pulse";

/// Render records as CSV, one row per record in the order given.
pub fn render_csv<Tz: TimeZone>(records: &[Record], tz: &Tz) -> Result<String>
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::with_capacity(HEADER.len() + 1 + records.len() * 48);
    out.push_str(HEADER);
    out.push('\n');

    for record in records {
        let local = local_time(record.timestamp, tz)?;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            record.timestamp.millis(),
            local.format("%Y-%m-%d"),
            local.format(time_pattern(&local)),
            record.systolic,
            record.diastolic,
            record.pulse,
        );
    }

    Ok(out)
}

/// Shortest time of day that loses nothing: `HH:MM`, then seconds, then
/// milliseconds.
fn time_pattern<T: Timelike>(time: &T) -> &'static str {
    if time.nanosecond() % 1_000_000_000 != 0 {
        "%H:%M:%S%.3f"
    } else if time.second() != 0 {
        "%H:%M:%S"
    } else {
        "%H:%M"
    }
}

/// Write the CSV report for `records` (the full history) and return its path.
pub fn write_csv<Tz: TimeZone>(
    export_dir: &Path,
    records: &[Record],
    now: Timestamp,
    tz: &Tz,
) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let path = report_path(export_dir, now, tz, "csv")?;
    let body = render_csv(records, tz)?;
    write_atomic(&path, body.as_bytes())?;
    Ok(path)
}
