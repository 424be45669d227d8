//! Merge several recorded sessions of one lane into a single session.
//!
//! A lane directory holds `session_<id>.jsonl` consolidated logs and optional
//! `session_<id>_raw.jsonl` transcripts. After a merge the directory holds one
//! consolidated log (plus at most one raw transcript) under a fresh session id,
//! and the originals sit untouched in `original_sessions/`.

use super::aggregate::{aggregate_summaries, AggregatedSummary};
use super::classifier::classify;
use super::reader::{byte_lines, first_session_start, read_events};
use crate::data::{EventBody, SessionRecord, LANE_IDENTITY_FIELDS};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix that marks a raw transcript.
pub const RAW_SUFFIX: &str = "_raw.jsonl";

/// Subdirectory that receives the merged originals.
pub const BACKUP_DIR: &str = "original_sessions";

/// Lanes of an experiment, in processing order.
pub const LANES: [&str; 2] = ["model_a", "model_b"];

/// Session files discovered in a lane directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFiles {
    /// Consolidated logs ordered by their `session_start` timestamp
    pub consolidated: Vec<PathBuf>,
    /// Raw transcripts matching `consolidated`, in the same order
    pub raw: Vec<PathBuf>,
}

/// The synthesized output of a merge, before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSession {
    pub session_id: String,
    pub start: Map<String, Value>,
    pub messages: Vec<Map<String, Value>>,
    pub summary: Map<String, Value>,
    pub end: Map<String, Value>,
    pub aggregated: AggregatedSummary,
    /// Inputs without a `session_start` record
    pub missing_starts: usize,
    /// Inputs without a `session_end` record
    pub missing_ends: usize,
}

/// What a completed lane merge produced.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub session_id: String,
    pub consolidated_path: PathBuf,
    pub raw_path: Option<PathBuf>,
    pub sessions_merged: usize,
    pub messages: usize,
    pub raw_events: usize,
    pub backed_up: usize,
    pub summary: AggregatedSummary,
}

/// Result of [`merge_lane`].
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Fewer than two consolidated logs; the directory was left untouched
    NothingToMerge { found: usize },
    Merged(Box<MergeReport>),
}

/// Per-lane status of an experiment-wide merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneStatus {
    /// Exactly one session, nothing to do
    NoMergeNeeded,
    Merged { session_id: String, sessions: usize },
    /// Lane directory missing or empty
    SkippedMissing,
    Failed(String),
}

/// Outcome of [`merge_experiment`].
#[derive(Debug, Clone, Default)]
pub struct ExperimentMergeReport {
    pub lanes: Vec<(String, LaneStatus)>,
}

impl ExperimentMergeReport {
    /// True unless some lane failed outright.
    pub fn is_success(&self) -> bool {
        !self
            .lanes
            .iter()
            .any(|(_, status)| matches!(status, LaneStatus::Failed(_)))
    }
}

/// Session id encoded in a `session_<id>.jsonl` or `session_<id>_raw.jsonl` name.
pub fn session_id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_prefix("session_")?;
    let stem = stem
        .strip_suffix(RAW_SUFFIX)
        .or_else(|| stem.strip_suffix(".jsonl"))?;
    (!stem.is_empty()).then_some(stem)
}

fn is_session_log(name: &str) -> bool {
    name.starts_with("session_") && name.ends_with(".jsonl")
}

/// Consolidated log names in a directory, sorted by name.
pub fn list_consolidated(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && is_session_log(name) && !name.contains(RAW_SUFFIX) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Raw transcript names in a directory, sorted by name.
pub fn list_raw(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && is_session_log(name) && name.contains(RAW_SUFFIX) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Discover the session files of a lane.
///
/// Consolidated logs are ordered by their own `session_start` timestamp; logs
/// without one (or unreadable ones) sort first. Raw transcripts without a
/// matching consolidated log are ignored.
pub fn find_session_files(dir: &Path) -> Result<SessionFiles> {
    let mut keyed: Vec<(DateTime<Utc>, PathBuf)> = list_consolidated(dir)?
        .into_iter()
        .map(|path| {
            let key = match first_session_start(&path) {
                Ok(Some(start)) => start.sort_key(),
                Ok(None) => DateTime::<Utc>::MIN_UTC,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    DateTime::<Utc>::MIN_UTC
                }
            };
            (key, path)
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);

    let consolidated: Vec<PathBuf> = keyed.into_iter().map(|(_, path)| path).collect();
    let raw = consolidated
        .iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let id = session_id_from_file_name(name)?;
            let candidate = dir.join(format!("session_{}{}", id, RAW_SUFFIX));
            candidate.is_file().then_some(candidate)
        })
        .collect();

    Ok(SessionFiles { consolidated, raw })
}

/// Read and classify one consolidated log. Read failures yield an empty record.
pub fn load_session(path: &Path) -> SessionRecord {
    let events = match read_events(path) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("Error reading {}: {}", path.display(), e);
            Vec::new()
        }
    };

    let mut record = classify(events);
    record.file_session_id = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(session_id_from_file_name)
        .map(str::to_string);
    record
}

fn copy_identity(from: Option<&EventBody>, into: &mut Map<String, Value>) {
    let Some(from) = from else {
        return;
    };
    for key in LANE_IDENTITY_FIELDS {
        if let Some(value) = from.payload.get(key).filter(|v| is_truthy(v)) {
            into.insert(key.to_string(), value.clone());
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Build the merged session from classified records in merge order.
///
/// `now` stands in for any boundary timestamp that no input provides.
pub fn build_merged_session(
    records: &[SessionRecord],
    session_id: &str,
    now: DateTime<Utc>,
) -> MergedSession {
    let count = records.len();
    let transcript_path = format!("merged_from_{}_sessions", count);
    let now_str = now.to_rfc3339();

    let first_start = records.iter().find_map(|r| r.start.as_ref());
    let last_end = records
        .iter()
        .filter_map(|r| r.end.as_ref())
        .enumerate()
        .max_by_key(|(idx, end)| (end.sort_key(), *idx))
        .map(|(_, end)| end);
    let missing_starts = records.iter().filter(|r| r.start.is_none()).count();
    let missing_ends = records.iter().filter(|r| r.end.is_none()).count();

    let start_cwd = first_start
        .and_then(|s| s.payload.get("cwd").cloned())
        .unwrap_or_else(|| json!(""));
    let source_ids: Vec<Value> = records
        .iter()
        .map(|r| json!(r.session_id().unwrap_or("unknown")))
        .collect();

    let mut start = into_object(json!({
        "type": "session_start",
        "timestamp": first_start
            .and_then(|s| s.payload.get("timestamp").cloned())
            .unwrap_or_else(|| json!(now_str)),
        "session_id": session_id,
        "transcript_path": transcript_path,
        "cwd": start_cwd,
        "git_metadata": first_start
            .and_then(|s| s.payload.get("git_metadata").cloned())
            .unwrap_or(Value::Null),
        "merged_from_sessions": source_ids,
    }));
    copy_identity(first_start, &mut start);

    let mut tagged: Vec<(DateTime<Utc>, Map<String, Value>)> = Vec::new();
    for record in records {
        let fallback_id = record.session_id().unwrap_or("unknown");
        for message in &record.messages {
            let original = message.session_id.as_deref().unwrap_or(fallback_id).to_string();
            let mut payload = message.payload.clone();
            payload.insert("session_id".to_string(), json!(session_id));
            payload.insert("original_session_id".to_string(), json!(original));
            tagged.push((message.sort_key(), payload));
        }
    }
    // Stable: ties keep file order, then position within the file.
    tagged.sort_by_key(|(ts, _)| *ts);
    let messages: Vec<Map<String, Value>> = tagged.into_iter().map(|(_, m)| m).collect();

    let aggregated = aggregate_summaries(records.iter().filter_map(SessionRecord::summary_data));

    let model_lane = first_start
        .and_then(|s| s.str_field("model_lane"))
        .filter(|lane| !lane.is_empty());
    let output_prefix = format!("session_{}", session_id);

    let mut summary_data = into_object(serde_json::to_value(&aggregated).unwrap_or_default());
    summary_data.insert("merged_sessions_count".to_string(), json!(count));
    summary_data.insert("original_session_ids".to_string(), json!(source_ids));
    summary_data.insert(
        "files".to_string(),
        json!({
            "processed_log": format!("{}.jsonl", output_prefix),
            "raw_transcript": format!("{}{}", output_prefix, RAW_SUFFIX),
            "git_diff": model_lane.map(|lane| format!("{}_diff.patch", lane)),
        }),
    );
    summary_data.insert(
        "validation".to_string(),
        json!({
            "complete": true,
            "unique_messages_processed": aggregated.total_messages,
            "thinking_blocks_extracted": aggregated.thinking_metrics.assistant_thinking_blocks_captured,
        }),
    );

    let mut summary = into_object(json!({
        "type": "session_summary",
        "timestamp": now_str,
        "session_id": session_id,
        "transcript_path": transcript_path,
        "cwd": start_cwd,
        "summary_data": summary_data,
    }));
    copy_identity(first_start, &mut summary);

    let mut end = into_object(json!({
        "type": "session_end",
        "timestamp": last_end
            .and_then(|e| e.payload.get("timestamp").cloned())
            .unwrap_or_else(|| json!(now_str)),
        "session_id": session_id,
        "transcript_path": transcript_path,
        "cwd": last_end
            .and_then(|e| e.payload.get("cwd").cloned())
            .unwrap_or_else(|| start_cwd.clone()),
        "reason": "merged_sessions",
    }));
    copy_identity(first_start, &mut end);

    MergedSession {
        session_id: session_id.to_string(),
        start,
        messages,
        summary,
        end,
        aggregated,
        missing_starts,
        missing_ends,
    }
}

/// Write the merged session as JSON lines: start, messages, summary, end.
pub fn write_consolidated(path: &Path, merged: &MergedSession) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let lines = std::iter::once(&merged.start)
        .chain(merged.messages.iter())
        .chain([&merged.summary, &merged.end]);
    for record in lines {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Concatenate raw transcripts in order, re-keying `sessionId` to the merged id.
///
/// Lines that are not JSON objects are copied verbatim. Returns the number of
/// lines written.
pub fn merge_raw_transcripts(raw_files: &[PathBuf], output: &Path, session_id: &str) -> Result<usize> {
    let file =
        File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;

    for raw in raw_files {
        let reader = match File::open(raw) {
            Ok(f) => BufReader::new(f),
            Err(e) => {
                tracing::warn!("Error reading {}: {}", raw.display(), e);
                continue;
            }
        };

        for line in byte_lines(reader) {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Error reading {}: {}", raw.display(), e);
                    break;
                }
            };
            let line = trim_ascii(&line);
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(mut event)) => {
                    if let Some(previous) = event.remove("sessionId") {
                        event.insert("originalSessionId".to_string(), previous);
                        event.insert("sessionId".to_string(), json!(session_id));
                    }
                    serde_json::to_writer(&mut writer, &event)?;
                }
                _ => writer.write_all(line)?,
            }
            writer.write_all(b"\n")?;
            written += 1;
        }
    }

    writer.flush()?;
    Ok(written)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn unique_backup_path(backup_dir: &Path, name: &str) -> PathBuf {
    let candidate = backup_dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    (1..)
        .map(|n| backup_dir.join(format!("{}.{}.{}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Move files into `<dir>/original_sessions/`. Nothing is deleted.
pub fn backup_originals(dir: &Path, files: &[PathBuf]) -> Result<usize> {
    let backup_dir = dir.join(BACKUP_DIR);
    fs::create_dir_all(&backup_dir)
        .with_context(|| format!("Failed to create {}", backup_dir.display()))?;

    let mut moved: Vec<(&Path, PathBuf)> = Vec::new();
    for file in files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let target = unique_backup_path(&backup_dir, name);
        if let Err(e) = fs::rename(file, &target) {
            // Put back what was already moved so the lane is unchanged
            for (original, backup) in moved.iter().rev() {
                if let Err(e) = fs::rename(backup, original) {
                    tracing::error!("Failed to restore {}: {}", original.display(), e);
                }
            }
            return Err(e).with_context(|| {
                format!("Failed to move {} to {}", file.display(), target.display())
            });
        }
        moved.push((file.as_path(), target));
    }
    Ok(moved.len())
}

fn staged(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Merge every session of a lane directory into one.
///
/// On error the lane directory is left as it was found.
pub fn merge_lane(dir: &Path) -> Result<MergeOutcome> {
    let files = find_session_files(dir)?;
    if files.consolidated.len() < 2 {
        return Ok(MergeOutcome::NothingToMerge {
            found: files.consolidated.len(),
        });
    }

    tracing::info!(
        "Merging {} sessions in {}",
        files.consolidated.len(),
        dir.display()
    );

    let records: Vec<SessionRecord> = files.consolidated.iter().map(|p| load_session(p)).collect();
    let session_id = uuid::Uuid::new_v4().to_string();
    let merged = build_merged_session(&records, &session_id, Utc::now());

    if merged.missing_starts > 0 {
        tracing::warn!("{} session(s) missing session_start event", merged.missing_starts);
    }
    if merged.missing_ends > 0 {
        tracing::warn!(
            "{} session(s) missing session_end event (incomplete sessions)",
            merged.missing_ends
        );
    }

    let consolidated_path = dir.join(format!("session_{}.jsonl", session_id));
    let raw_path = (!files.raw.is_empty())
        .then(|| dir.join(format!("session_{}{}", session_id, RAW_SUFFIX)));

    // Outputs carry a suffix that lane discovery ignores until the originals are away
    let staged_consolidated = staged(&consolidated_path);
    let staged_raw = raw_path.as_deref().map(staged);
    let discard = || {
        for path in std::iter::once(&staged_consolidated).chain(staged_raw.as_ref()) {
            crate::util::remove_file_quietly(path);
        }
    };

    let written = write_consolidated(&staged_consolidated, &merged).and_then(|()| match &staged_raw {
        Some(staged_raw) => merge_raw_transcripts(&files.raw, staged_raw, &session_id),
        None => Ok(0),
    });
    let raw_events = match written {
        Ok(count) => count,
        Err(e) => {
            discard();
            return Err(e);
        }
    };

    let originals: Vec<PathBuf> = files.consolidated.iter().chain(&files.raw).cloned().collect();
    let backed_up = match backup_originals(dir, &originals) {
        Ok(count) => count,
        Err(e) => {
            discard();
            return Err(e);
        }
    };

    fs::rename(&staged_consolidated, &consolidated_path)
        .with_context(|| format!("Failed to finalize {}", consolidated_path.display()))?;
    if let (Some(staged_raw), Some(raw_path)) = (&staged_raw, &raw_path) {
        fs::rename(staged_raw, raw_path)
            .with_context(|| format!("Failed to finalize {}", raw_path.display()))?;
    }

    Ok(MergeOutcome::Merged(Box::new(MergeReport {
        session_id,
        consolidated_path,
        raw_path,
        sessions_merged: records.len(),
        messages: merged.messages.len(),
        raw_events,
        backed_up,
        summary: merged.aggregated,
    })))
}

/// Merge each lane of an experiment root (`logs/model_a`, `logs/model_b`).
pub fn merge_experiment(root: &Path) -> Result<ExperimentMergeReport> {
    let logs_dir = root.join("logs");
    if !logs_dir.is_dir() {
        anyhow::bail!("logs/ directory not found in {}", root.display());
    }

    let mut report = ExperimentMergeReport::default();
    for lane in LANES {
        let lane_dir = logs_dir.join(lane);
        let status = if !lane_dir.is_dir() {
            tracing::warn!("{}: logs/{}/ directory not found, skipping", lane, lane);
            LaneStatus::SkippedMissing
        } else {
            match merge_lane(&lane_dir) {
                Ok(MergeOutcome::NothingToMerge { found: 0 }) => {
                    tracing::warn!("{}: no session files found, skipping", lane);
                    LaneStatus::SkippedMissing
                }
                Ok(MergeOutcome::NothingToMerge { .. }) => LaneStatus::NoMergeNeeded,
                Ok(MergeOutcome::Merged(merged)) => LaneStatus::Merged {
                    session_id: merged.session_id,
                    sessions: merged.sessions_merged,
                },
                Err(e) => {
                    tracing::error!("{}: merge failed: {:#}", lane, e);
                    LaneStatus::Failed(format!("{:#}", e))
                }
            }
        };
        report.lanes.push((lane.to_string(), status));
    }

    Ok(report)
}

/// Whether a directory looks like an experiment root rather than a lane.
pub fn is_experiment_root(dir: &Path) -> bool {
    dir.join("manifest.json").exists() || dir.join("logs").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::reader::parse_line;
    use chrono::TimeZone;

    fn record(lines: &[&str]) -> SessionRecord {
        classify(lines.iter().map(|l| parse_line(l).unwrap()).collect())
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn session_id_from_names() {
        assert_eq!(session_id_from_file_name("session_abc.jsonl"), Some("abc"));
        assert_eq!(session_id_from_file_name("session_abc_raw.jsonl"), Some("abc"));
        assert_eq!(session_id_from_file_name("session_.jsonl"), None);
        assert_eq!(session_id_from_file_name("notes.jsonl"), None);
    }

    #[test]
    fn missing_bounds_fall_back_to_now() {
        let records = vec![
            record(&[r#"{"type":"user","timestamp":"2024-01-01T00:00:00Z","session_id":"a"}"#]),
            record(&[r#"{"type":"user","timestamp":"2024-01-01T00:00:01Z","session_id":"b"}"#]),
        ];
        let merged = build_merged_session(&records, "new", fixed_now());

        assert_eq!(merged.missing_starts, 2);
        assert_eq!(merged.missing_ends, 2);
        assert_eq!(merged.start["timestamp"], json!(fixed_now().to_rfc3339()));
        assert_eq!(merged.end["timestamp"], json!(fixed_now().to_rfc3339()));
        assert_eq!(merged.start["merged_from_sessions"], json!(["unknown", "unknown"]));
    }

    #[test]
    fn end_uses_latest_end_and_start_uses_first_start() {
        let records = vec![
            record(&[
                r#"{"type":"session_start","timestamp":"2024-01-01T00:00:00Z","session_id":"a","cwd":"/w","model_lane":"model_a","task_id":"T1","model_name":""}"#,
                r#"{"type":"session_end","timestamp":"2024-01-01T05:00:00Z","cwd":"/late"}"#,
            ]),
            record(&[
                r#"{"type":"session_start","timestamp":"2024-01-01T01:00:00Z","session_id":"b","cwd":"/other"}"#,
                r#"{"type":"session_end","timestamp":"2024-01-01T02:00:00Z","cwd":"/early"}"#,
            ]),
        ];
        let merged = build_merged_session(&records, "new", fixed_now());

        assert_eq!(merged.start["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(merged.start["cwd"], "/w");
        assert_eq!(merged.end["timestamp"], "2024-01-01T05:00:00Z");
        assert_eq!(merged.end["cwd"], "/late");
        assert_eq!(merged.end["reason"], "merged_sessions");
        assert_eq!(merged.end["task_id"], "T1");
        assert!(!merged.start.contains_key("model_name"));
        assert_eq!(
            merged.summary["summary_data"]["files"]["git_diff"],
            "model_a_diff.patch"
        );
    }

    #[test]
    fn messages_are_sorted_stably_and_retagged() {
        let records = vec![
            record(&[
                r#"{"type":"session_start","timestamp":"2024-01-01T00:00:00Z","session_id":"a"}"#,
                r#"{"type":"user","timestamp":"2024-01-01T00:00:05Z","session_id":"a","n":1}"#,
                r#"{"type":"assistant","timestamp":"2024-01-01T00:00:10Z","session_id":"a","n":2}"#,
            ]),
            record(&[
                r#"{"type":"session_start","timestamp":"2024-01-01T00:00:01Z","session_id":"b"}"#,
                r#"{"type":"user","timestamp":"2024-01-01T00:00:05Z","n":3}"#,
                r#"{"type":"assistant","timestamp":"bogus","session_id":"b","n":4}"#,
            ]),
        ];
        let merged = build_merged_session(&records, "new", fixed_now());

        let order: Vec<i64> = merged.messages.iter().map(|m| m["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![4, 1, 3, 2]);
        assert!(merged.messages.iter().all(|m| m["session_id"] == "new"));
        let originals: Vec<&str> = merged
            .messages
            .iter()
            .map(|m| m["original_session_id"].as_str().unwrap())
            .collect();
        assert_eq!(originals, vec!["b", "a", "b", "a"]);
    }

    #[test]
    fn summary_wraps_aggregate_and_bookkeeping() {
        let records = vec![
            record(&[r#"{"type":"session_summary","summary_data":{"total_messages":4,"thinking_metrics":{"assistant_thinking_blocks_captured":2}}}"#]),
            record(&[r#"{"type":"session_summary","summary_data":{"total_messages":6}}"#]),
            record(&[]),
        ];
        let merged = build_merged_session(&records, "new", fixed_now());
        let data = &merged.summary["summary_data"];

        assert_eq!(data["total_messages"], 10);
        assert_eq!(data["merged_sessions_count"], 3);
        assert_eq!(data["validation"]["unique_messages_processed"], 10);
        assert_eq!(data["validation"]["thinking_blocks_extracted"], 2);
        assert_eq!(data["files"]["processed_log"], "session_new.jsonl");
        assert_eq!(data["files"]["git_diff"], Value::Null);
    }

    #[test]
    fn backup_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(BACKUP_DIR)).unwrap();
        fs::write(dir.path().join(BACKUP_DIR).join("session_a.jsonl"), "old").unwrap();
        let file = dir.path().join("session_a.jsonl");
        fs::write(&file, "new").unwrap();

        backup_originals(dir.path(), &[file]).unwrap();

        let backup = dir.path().join(BACKUP_DIR);
        assert_eq!(fs::read_to_string(backup.join("session_a.jsonl")).unwrap(), "old");
        assert_eq!(fs::read_to_string(backup.join("session_a.1.jsonl")).unwrap(), "new");
    }

    #[test]
    fn experiment_report_success_ignores_skips() {
        let report = ExperimentMergeReport {
            lanes: vec![
                ("model_a".into(), LaneStatus::SkippedMissing),
                ("model_b".into(), LaneStatus::NoMergeNeeded),
            ],
        };
        assert!(report.is_success());

        let failed = ExperimentMergeReport {
            lanes: vec![("model_a".into(), LaneStatus::Failed("boom".into()))],
        };
        assert!(!failed.is_success());
    }
}
