//! Streaming Delta Performer (spec.md §4.2): the wire-parsing state machine
//! that turns a payload byte stream into dispatched operations, with resume
//! support backed by a small key-value preference store.

mod prefs;
mod state_machine;

pub use prefs::{FilePrefs, Prefs};
pub use state_machine::{DeltaPerformer, PendingOperation, PerformerState};
