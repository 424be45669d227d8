//! Line-delimited event log reader.
//!
//! A malformed line never poisons the file: [`parse_line`] reports it and the
//! readers here skip it.

use crate::data::{Event, EventBody};
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// A single line that could not be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line is empty")]
    Empty,

    #[error("line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Parse one log line into an [`Event`].
pub fn parse_line(line: &str) -> Result<Event, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => Ok(Event::from_object(map)),
        other => Err(ParseError::NotAnObject(json_type_name(&other))),
    }
}

/// Parse one raw line, which may not be valid UTF-8.
pub fn parse_line_bytes(line: &[u8]) -> Result<Event, ParseError> {
    parse_line(std::str::from_utf8(line)?)
}

/// Lines of `reader` as bytes, without the line terminator.
///
/// Unlike [`BufRead::lines`], a line that is not valid UTF-8 is still yielded.
/// Iteration ends after the first I/O error.
pub fn byte_lines<R: BufRead>(mut reader: R) -> impl Iterator<Item = io::Result<Vec<u8>>> {
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed {
            return None;
        }
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(Ok(buf))
            }
            Err(e) => {
                failed = true;
                Some(Err(e))
            }
        }
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read every parseable event of a file, in file order.
///
/// Only I/O failures are returned as errors; bad lines are logged and skipped.
pub fn read_events(path: &Path) -> io::Result<Vec<Event>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();

    for (idx, line) in byte_lines(reader).enumerate() {
        let line = line?;
        match parse_line_bytes(&line) {
            Ok(event) => events.push(event),
            Err(ParseError::Empty) => {}
            Err(e) => {
                tracing::debug!("Skipping line {} of {}: {}", idx + 1, path.display(), e);
            }
        }
    }

    Ok(events)
}

/// Find the first `session_start` record of a file without reading the rest.
pub fn first_session_start(path: &Path) -> io::Result<Option<EventBody>> {
    let reader = BufReader::new(File::open(path)?);
    for line in byte_lines(reader) {
        if let Ok(Event::SessionStart(body)) = parse_line_bytes(&line?) {
            return Ok(Some(body));
        }
    }
    Ok(None)
}

/// Whether the file holds a `session_summary` record.
///
/// Older logs tag records with `event_type` instead of `type`; both count.
pub fn has_session_summary(path: &Path) -> io::Result<bool> {
    let reader = BufReader::new(File::open(path)?);
    for line in byte_lines(reader) {
        let line = line?;
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&line) else {
            continue;
        };
        let tagged = |key: &str| map.get(key).and_then(Value::as_str) == Some("session_summary");
        if tagged("type") || tagged("event_type") {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EventKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn parse_line_rejects_non_objects() {
        assert!(matches!(parse_line("   "), Err(ParseError::Empty)));
        assert!(matches!(parse_line("{not json"), Err(ParseError::Json(_))));
        assert!(matches!(parse_line("[1,2]"), Err(ParseError::NotAnObject("an array"))));
    }

    #[test]
    fn parse_line_classifies_kind() {
        let event = parse_line(r#"{"type":"assistant","timestamp":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Message);
    }

    #[test]
    fn read_events_skips_malformed_lines() {
        let file = write_lines(&[
            r#"{"type":"session_start","timestamp":"2024-01-01T00:00:00Z","session_id":"a"}"#,
            "garbage",
            "",
            r#"{"type":"user","timestamp":"2024-01-01T00:00:01Z"}"#,
            r#""just a string""#,
            r#"{"type":"session_end","timestamp":"2024-01-01T00:00:02Z"}"#,
        ]);

        let events = read_events(file.path()).unwrap();
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::SessionStart, EventKind::Message, EventKind::SessionEnd]
        );
    }

    #[test]
    fn invalid_utf8_line_is_skipped_not_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"type\":\"user\",\"timestamp\":\"2024-01-01T00:00:00Z\"}\n").unwrap();
        file.write_all(b"{\"type\":\"user\",\"x\":\"\xff\xfe\"}\r\n").unwrap();
        file.write_all(b"{\"type\":\"assistant\",\"timestamp\":\"2024-01-01T00:00:01Z\"}").unwrap();

        let events = read_events(file.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(parse_line_bytes(b"\xff"), Err(ParseError::Utf8(_))));
    }

    #[test]
    fn byte_lines_strip_terminators() {
        let lines: Vec<Vec<u8>> = byte_lines(&b"a\r\nb\n\xffc"[..]).map(Result::unwrap).collect();
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec(), b"\xffc".to_vec()]);
    }

    #[test]
    fn read_events_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(&dir.path().join("nope.jsonl")).is_err());
    }

    #[test]
    fn first_session_start_finds_start_after_noise() {
        let file = write_lines(&[
            "oops",
            r#"{"type":"user","timestamp":"2024-01-01T00:00:00Z"}"#,
            r#"{"type":"session_start","timestamp":"2024-01-02T00:00:00Z","session_id":"s1"}"#,
        ]);
        let start = first_session_start(file.path()).unwrap().unwrap();
        assert_eq!(start.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn summary_detection_accepts_legacy_tag() {
        let legacy = write_lines(&[r#"{"event_type":"session_summary"}"#]);
        let none = write_lines(&[r#"{"type":"user"}"#]);
        assert!(has_session_summary(legacy.path()).unwrap());
        assert!(!has_session_summary(none.path()).unwrap());
    }
}
