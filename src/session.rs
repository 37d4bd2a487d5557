//! Per-session owner of the store and everything derived from it.

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::Result;
use crate::export::{self, PdfReport};
use crate::form::EntryForm;
use crate::history::HistoryView;
use crate::repository::Repository;
use crate::store::Store;
use crate::writer::WriteQueue;
use chrono::{Local, TimeZone};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Wires one store to its repository, background writer, history view and
/// entry form. Window selection and the draft are owned here rather than
/// kept in globals.
pub struct Session {
    store: Arc<Store>,
    repository: Repository,
    writer: WriteQueue,
    history: HistoryView,
    form: EntryForm,
    clock: Arc<dyn Clock>,
    export_dir: PathBuf,
}

impl Session {
    pub fn open(config: AppConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Arc::new(Store::open_or_create(config.store)?);
        let repository = Repository::new(store.clone());
        let writer = WriteQueue::new(repository.clone())?;
        let history = HistoryView::new(
            repository.clone(),
            writer.clone(),
            Arc::clone(&clock),
            &config.history,
        );
        let form = EntryForm::new(writer.clone(), Arc::clone(&clock));

        info!(path = %store.path().display(), "session opened");

        Ok(Self {
            store,
            repository,
            writer,
            history,
            form,
            clock,
            export_dir: config.export_dir,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn writer(&self) -> &WriteQueue {
        &self.writer
    }

    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    pub fn form(&self) -> &EntryForm {
        &self.form
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Export the whole history as CSV in the local time zone.
    pub fn export_csv(&self) -> export::Result<PathBuf> {
        self.export_csv_in(&Local)
    }

    pub fn export_csv_in<Tz: TimeZone>(&self, tz: &Tz) -> export::Result<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        let all = self.repository.snapshot();
        export::write_csv(&self.export_dir, &all.records, self.clock.now(), tz)
    }

    /// Export the records in the selected window as a PDF around `chart`.
    pub fn export_pdf(&self, chart: &RgbImage) -> export::Result<PathBuf> {
        self.export_pdf_in(chart, &Local)
    }

    pub fn export_pdf_in<Tz: TimeZone>(&self, chart: &RgbImage, tz: &Tz) -> export::Result<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        let filtered = self.history.current();
        let report = PdfReport {
            title_suffix: filtered.window.label(),
            chart,
            records: &filtered.records,
        };
        export::write_pdf(&self.export_dir, &report, filtered.derived_at, tz)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store.path())
            .field("history", &self.history)
            .field("export_dir", &self.export_dir)
            .finish_non_exhaustive()
    }
}
