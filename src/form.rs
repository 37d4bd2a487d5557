//! Entry form for a new measurement.
//!
//! The draft lives here, apart from the store, until [`EntryForm::submit`]
//! hands it to the background writer.

use crate::clock::Clock;
use crate::error::StoreError;
use crate::subscriptions::{SubscriptionHandle, SubscriptionManager};
use crate::types::{RecordId, RecordInput, Timestamp};
use crate::writer::{WriteOp, WriteOutcome, WriteQueue};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// One of the three numeric inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Sys,
    Dia,
    Pulse,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Sys => "SYS",
            Field::Dia => "DIA",
            Field::Pulse => "PULSE",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Field::Sys | Field::Dia => "mmHg",
            Field::Pulse => "bpm",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.unit())
    }
}

/// Why a draft cannot be submitted. The message is shown to the user as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Enter {0}")]
    Missing(Field),

    #[error("{} value is too large", .0.name())]
    TooLarge(Field),
}

/// Error from [`EntryForm::submit`].
#[derive(Debug, Error)]
pub enum FormError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Could not save measurement: {0}")]
    Store(#[from] StoreError),
}

/// One-shot notifications. Only observers attached when the event fires
/// receive it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormEvent {
    Saved(RecordId),
    SaveFailed(String),
}

/// The measurement being composed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draft {
    pub sys: String,
    pub dia: String,
    pub pulse: String,
    pub timestamp: Timestamp,
    pub error_message: Option<String>,
}

impl Draft {
    pub fn blank(timestamp: Timestamp) -> Self {
        Self {
            sys: String::new(),
            dia: String::new(),
            pulse: String::new(),
            timestamp,
            error_message: None,
        }
    }

    fn text(&self, field: Field) -> &str {
        match field {
            Field::Sys => &self.sys,
            Field::Dia => &self.dia,
            Field::Pulse => &self.pulse,
        }
    }

    fn text_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Sys => &mut self.sys,
            Field::Dia => &mut self.dia,
            Field::Pulse => &mut self.pulse,
        }
    }

    /// Presence check only; any in-range integer is accepted.
    pub fn validate(&self) -> Result<RecordInput, ValidationError> {
        let sys = parse_field(self, Field::Sys)?;
        let dia = parse_field(self, Field::Dia)?;
        let pulse = parse_field(self, Field::Pulse)?;
        Ok(RecordInput::new(self.timestamp, sys, dia, pulse))
    }
}

fn parse_field(draft: &Draft, field: Field) -> Result<u32, ValidationError> {
    let text = draft.text(field);
    if text.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    // Text is digits only, so the only possible parse failure is overflow.
    text.parse().map_err(|_| ValidationError::TooLarge(field))
}

fn digits_only(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

struct FormShared {
    draft: Mutex<Draft>,
    states: SubscriptionManager<Draft>,
    events: SubscriptionManager<FormEvent>,
    clock: Arc<dyn Clock>,
}

impl FormShared {
    fn modify(&self, f: impl FnOnce(&mut Draft)) {
        let mut draft = self.draft.lock();
        f(&mut draft);
        self.states.broadcast(draft.clone());
    }

    fn finish(&self, result: crate::error::Result<WriteOutcome>) {
        match result {
            Ok(WriteOutcome::Inserted(id)) => {
                let now = self.clock.now();
                self.modify(|draft| *draft = Draft::blank(now));
                debug!(%id, "measurement saved");
                self.events.broadcast(FormEvent::Saved(id));
            }
            Ok(other) => {
                warn!(?other, "unexpected outcome for form insert");
            }
            Err(e) => {
                let message = FormError::Store(e).to_string();
                self.modify(|draft| draft.error_message = Some(message.clone()));
                self.events.broadcast(FormEvent::SaveFailed(message));
            }
        }
    }
}

/// Draft state plus submit.
pub struct EntryForm {
    shared: Arc<FormShared>,
    writer: WriteQueue,
}

impl EntryForm {
    pub fn new(writer: WriteQueue, clock: Arc<dyn Clock>) -> Self {
        let draft = Draft::blank(clock.now());
        Self {
            shared: Arc::new(FormShared {
                draft: Mutex::new(draft),
                states: SubscriptionManager::new(),
                events: SubscriptionManager::new(),
                clock,
            }),
            writer,
        }
    }

    /// Current draft.
    pub fn state(&self) -> Draft {
        self.shared.draft.lock().clone()
    }

    /// Receive the draft after every change.
    pub fn subscribe_state(&self) -> SubscriptionHandle<Draft> {
        self.shared.states.subscribe()
    }

    pub fn subscribe_events(&self) -> SubscriptionHandle<FormEvent> {
        self.shared.events.subscribe()
    }

    pub fn edit_sys(&self, text: &str) {
        self.edit(Field::Sys, text);
    }

    pub fn edit_dia(&self, text: &str) {
        self.edit(Field::Dia, text);
    }

    pub fn edit_pulse(&self, text: &str) {
        self.edit(Field::Pulse, text);
    }

    /// Replace a field with the digits of `text`. Clears any error.
    pub fn edit(&self, field: Field, text: &str) {
        let text = digits_only(text);
        self.shared.modify(|draft| {
            *draft.text_mut(field) = text;
            draft.error_message = None;
        });
    }

    pub fn set_timestamp(&self, timestamp: Timestamp) {
        self.shared.modify(|draft| draft.timestamp = timestamp);
    }

    pub fn reset_to_now(&self) {
        let now = self.shared.clock.now();
        self.set_timestamp(now);
    }

    /// Validate and queue the insert.
    ///
    /// Returns once the insert is queued. The draft resets and
    /// [`FormEvent::Saved`] fires when it completes; a storage failure
    /// leaves the values in place and fires [`FormEvent::SaveFailed`].
    pub fn submit(&self) -> Result<(), FormError> {
        let input = {
            let mut draft = self.shared.draft.lock();
            match draft.validate() {
                Ok(input) => input,
                Err(e) => {
                    draft.error_message = Some(e.to_string());
                    self.shared.states.broadcast(draft.clone());
                    return Err(e.into());
                }
            }
        };

        // The completion must not hold the queue, or the worker could end
        // up owning the last clone.
        let shared = Arc::clone(&self.shared);
        let queued = self
            .writer
            .submit_with(WriteOp::Insert(input), move |result| shared.finish(result));

        if let Err(e) = queued {
            let err = FormError::Store(e);
            let message = err.to_string();
            self.shared
                .modify(|draft| draft.error_message = Some(message));
            return Err(err);
        }
        Ok(())
    }
}

impl fmt::Debug for EntryForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryForm")
            .field("draft", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::Repository;
    use crate::store::{Store, StoreConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup(dir: &TempDir) -> (Arc<Store>, Arc<ManualClock>, EntryForm) {
        let store = Arc::new(
            Store::create(StoreConfig {
                path: dir.path().join("store"),
                ..Default::default()
            })
            .unwrap(),
        );
        let writer = WriteQueue::new(Repository::new(store.clone())).unwrap();
        let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000)));
        let form = EntryForm::new(writer, clock.clone());
        (store, clock, form)
    }

    #[test]
    fn test_non_digits_are_stripped() {
        let dir = TempDir::new().unwrap();
        let (_store, _clock, form) = setup(&dir);

        form.edit_sys("12a3");
        form.edit_pulse(" 7-0 ");
        let draft = form.state();
        assert_eq!(draft.sys, "123");
        assert_eq!(draft.pulse, "70");
    }

    #[test]
    fn test_missing_fields_in_order() {
        let dir = TempDir::new().unwrap();
        let (store, _clock, form) = setup(&dir);

        let err = form.submit().unwrap_err();
        assert_eq!(err.to_string(), "Enter SYS (mmHg)");
        assert_eq!(form.state().error_message.as_deref(), Some("Enter SYS (mmHg)"));

        form.edit_sys("120");
        assert_eq!(form.state().error_message, None);
        assert_eq!(form.submit().unwrap_err().to_string(), "Enter DIA (mmHg)");

        form.edit_dia("80");
        assert_eq!(form.submit().unwrap_err().to_string(), "Enter PULSE (bpm)");

        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_too_large_value() {
        let dir = TempDir::new().unwrap();
        let (_store, _clock, form) = setup(&dir);

        form.edit_sys("120");
        form.edit_dia("99999999999");
        form.edit_pulse("70");
        assert!(matches!(
            form.submit(),
            Err(FormError::Validation(ValidationError::TooLarge(Field::Dia)))
        ));
        assert_eq!(
            form.state().error_message.as_deref(),
            Some("DIA value is too large")
        );
    }

    #[test]
    fn test_submit_saves_and_resets() {
        let dir = TempDir::new().unwrap();
        let (store, clock, form) = setup(&dir);
        let events = form.subscribe_events();

        let taken_at = Timestamp(1_600_000_000_000);
        form.set_timestamp(taken_at);
        form.edit_sys("120");
        form.edit_dia("80");
        form.edit_pulse("70");
        clock.advance(60_000);
        form.submit().unwrap();

        let FormEvent::Saved(id) = events.recv_timeout(WAIT).unwrap() else {
            panic!("expected saved event");
        };

        let saved = store.get(id).unwrap();
        assert_eq!((saved.systolic, saved.diastolic, saved.pulse), (120, 80, 70));
        assert_eq!(saved.timestamp, taken_at);
        assert_eq!(store.snapshot().len(), 1);

        assert_eq!(form.state(), Draft::blank(clock.now()));
    }

    #[test]
    fn test_saved_event_not_replayed() {
        let dir = TempDir::new().unwrap();
        let (_store, _clock, form) = setup(&dir);
        let early = form.subscribe_events();

        form.edit_sys("130");
        form.edit_dia("85");
        form.edit_pulse("72");
        form.submit().unwrap();
        assert!(matches!(early.recv_timeout(WAIT), Ok(FormEvent::Saved(_))));

        let late = form.subscribe_events();
        assert!(late.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_reset_to_now() {
        let dir = TempDir::new().unwrap();
        let (_store, clock, form) = setup(&dir);

        form.set_timestamp(Timestamp(5));
        clock.advance(1_000);
        form.reset_to_now();
        assert_eq!(form.state().timestamp, clock.now());
    }

    #[test]
    fn test_state_subscription_sees_edits() {
        let dir = TempDir::new().unwrap();
        let (_store, _clock, form) = setup(&dir);
        let states = form.subscribe_state();

        form.edit_sys("1");
        form.edit_sys("12");
        assert_eq!(states.latest().unwrap().sys, "12");
    }
}
