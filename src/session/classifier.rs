//! Bucket a session's events into a [`SessionRecord`].

use crate::data::{Event, SessionRecord};

/// Classify events by kind. A repeated boundary or summary record replaces the
/// earlier one.
pub fn classify(events: Vec<Event>) -> SessionRecord {
    let mut record = SessionRecord::default();

    for event in events {
        match event {
            Event::SessionStart(body) => record.start = Some(body),
            Event::SessionEnd(body) => record.end = Some(body),
            Event::SessionSummary(body) => record.summary = Some(body),
            Event::Message(body) => record.messages.push(body),
            Event::Other(raw) => record.other.push(raw),
        }
    }

    record
}
