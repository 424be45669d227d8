//! Core data model shared by the merge and submission pipelines.
//!
//! Session logs are JSON lines. Each line becomes an [`Event`]; the events of
//! one file are bucketed into a [`SessionRecord`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Record types that count as conversation messages when merging.
pub const MESSAGE_TYPES: [&str; 3] = ["user", "assistant", "assistant_thinking"];

/// Fields copied from the first session start onto every synthesized record.
pub const LANE_IDENTITY_FIELDS: [&str; 4] = ["task_id", "model_lane", "experiment_root", "model_name"];

/// The kind tag of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    SessionSummary,
    Message,
    Other,
}

impl EventKind {
    /// Map a record's `type` field to its kind.
    pub fn from_type(record_type: Option<&str>) -> Self {
        match record_type {
            Some("session_start") => Self::SessionStart,
            Some("session_end") => Self::SessionEnd,
            Some("session_summary") => Self::SessionSummary,
            Some(t) if MESSAGE_TYPES.contains(&t) => Self::Message,
            _ => Self::Other,
        }
    }
}

/// Shared body of every recognized event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBody {
    /// Parsed `timestamp`; `None` when missing or unparsable
    pub timestamp: Option<DateTime<Utc>>,
    /// The record's `session_id`, if present
    pub session_id: Option<String>,
    /// The full JSON object as read from disk
    pub payload: Map<String, Value>,
}

impl EventBody {
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        let session_id = payload
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            timestamp,
            session_id,
            payload,
        }
    }

    /// Timestamp used for ordering. Missing values sort first.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Raw string field from the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// One parsed line of a consolidated session log.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SessionStart(EventBody),
    SessionEnd(EventBody),
    SessionSummary(EventBody),
    Message(EventBody),
    /// Any other record, kept verbatim
    Other(Value),
}

impl Event {
    /// Build an event from a decoded JSON object.
    pub fn from_object(payload: Map<String, Value>) -> Self {
        let kind = EventKind::from_type(payload.get("type").and_then(Value::as_str));
        match kind {
            EventKind::SessionStart => Self::SessionStart(EventBody::from_payload(payload)),
            EventKind::SessionEnd => Self::SessionEnd(EventBody::from_payload(payload)),
            EventKind::SessionSummary => Self::SessionSummary(EventBody::from_payload(payload)),
            EventKind::Message => Self::Message(EventBody::from_payload(payload)),
            EventKind::Other => Self::Other(Value::Object(payload)),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionStart(_) => EventKind::SessionStart,
            Self::SessionEnd(_) => EventKind::SessionEnd,
            Self::SessionSummary(_) => EventKind::SessionSummary,
            Self::Message(_) => EventKind::Message,
            Self::Other(_) => EventKind::Other,
        }
    }

    pub fn body(&self) -> Option<&EventBody> {
        match self {
            Self::SessionStart(b) | Self::SessionEnd(b) | Self::SessionSummary(b) | Self::Message(b) => {
                Some(b)
            }
            Self::Other(_) => None,
        }
    }
}

/// Everything one session file contributes to a merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRecord {
    pub start: Option<EventBody>,
    pub end: Option<EventBody>,
    pub summary: Option<EventBody>,
    /// Message events in file order
    pub messages: Vec<EventBody>,
    pub other: Vec<Value>,
    /// Session id derived from the file name, used when the start record lacks one
    pub file_session_id: Option<String>,
}

impl SessionRecord {
    /// Best known identifier of this session.
    pub fn session_id(&self) -> Option<&str> {
        self.start
            .as_ref()
            .and_then(|s| s.session_id.as_deref())
            .or(self.file_session_id.as_deref())
    }

    /// The `summary_data` object of the summary record, if any.
    pub fn summary_data(&self) -> Option<&Value> {
        self.summary
            .as_ref()
            .and_then(|s| s.payload.get("summary_data"))
    }
}

/// Parse an ISO-8601 timestamp. Offsets are normalized to UTC; naive values
/// are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_zulu_and_offset_timestamps() {
        let z = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let off = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(z, off);
        assert_eq!(z, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let ts = parse_timestamp("2024-03-01T10:00:00.250").unwrap();
        assert_eq!(ts.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn garbage_timestamp_sorts_first() {
        let body = EventBody::from_payload(object(json!({"type": "user", "timestamp": "yesterday"})));
        assert!(body.timestamp.is_none());
        assert_eq!(body.sort_key(), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn message_types_map_to_message_kind() {
        for t in MESSAGE_TYPES {
            assert_eq!(EventKind::from_type(Some(t)), EventKind::Message);
        }
        assert_eq!(EventKind::from_type(Some("tool_use")), EventKind::Other);
        assert_eq!(EventKind::from_type(None), EventKind::Other);
    }

    #[test]
    fn other_event_keeps_raw_payload() {
        let event = Event::from_object(object(json!({"type": "hook", "x": 1})));
        assert_eq!(event.kind(), EventKind::Other);
        assert!(event.body().is_none());
        assert_eq!(event, Event::Other(json!({"type": "hook", "x": 1})));
    }

    #[test]
    fn record_session_id_prefers_start() {
        let mut record = SessionRecord {
            file_session_id: Some("from-file".to_string()),
            ..Default::default()
        };
        assert_eq!(record.session_id(), Some("from-file"));

        record.start = Some(EventBody::from_payload(object(
            json!({"type": "session_start", "session_id": "from-start"}),
        )));
        assert_eq!(record.session_id(), Some("from-start"));
    }
}
