//! Test utilities and fixtures for lanepost tests

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Minimal valid manifest JSON
pub fn manifest_json() -> Value {
    json!({
        "expert_name": "Test Expert",
        "task_id": "task-7",
        "timestamp": "20240501_120000",
        "repo_url": "https://example.com/repo.git",
        "assignments": {"model_a": "alpha", "model_b": "beta"},
        "model_config": {"temperature": 0}
    })
}

/// Write JSON lines to a file, creating parent directories.
pub fn write_lines(path: &Path, lines: &[Value]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    fs::write(path, body).unwrap();
}

pub fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

/// A message record: `(timestamp, type)`.
pub type Msg<'a> = (&'a str, &'a str);

/// Write `session_<id>.jsonl` with start, messages, a summary and an end.
pub fn write_session(dir: &Path, id: &str, start: &str, messages: &[Msg], end: Option<&str>) -> PathBuf {
    let mut lines = vec![json!({
        "type": "session_start",
        "timestamp": start,
        "session_id": id,
        "cwd": "/work/model_a",
        "model_lane": "model_a",
        "task_id": "task-7",
        "git_metadata": {"base_commit": "0123456789abcdef"}
    })];
    for (i, (ts, kind)) in messages.iter().enumerate() {
        lines.push(json!({
            "type": kind,
            "timestamp": ts,
            "session_id": id,
            "content": format!("{}-{}", id, i)
        }));
    }
    lines.push(json!({
        "type": "session_summary",
        "timestamp": end.unwrap_or(start),
        "session_id": id,
        "summary_data": {
            "total_messages": messages.len(),
            "usage_totals": {"total_input_tokens": 10},
            "git_metrics": {"files_changed_count": 2}
        }
    }));
    if let Some(end) = end {
        lines.push(json!({"type": "session_end", "timestamp": end, "session_id": id}));
    }

    let path = dir.join(format!("session_{}.jsonl", id));
    write_lines(&path, &lines);
    path
}

/// Write `session_<id>_raw.jsonl`.
pub fn write_raw(dir: &Path, id: &str, count: usize) -> PathBuf {
    let lines: Vec<Value> = (0..count)
        .map(|i| json!({"sessionId": id, "uuid": format!("{}-{}", id, i)}))
        .collect();
    let path = dir.join(format!("session_{}_raw.jsonl", id));
    write_lines(&path, &lines);
    path
}

pub fn touch(root: &Path, rel: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{}").unwrap();
    path
}

/// A complete experiment directory that passes validation.
pub fn complete_experiment(root: &Path) {
    fs::write(
        root.join("manifest.json"),
        serde_json::to_string_pretty(&manifest_json()).unwrap(),
    )
    .unwrap();
    for lane in ["model_a", "model_b"] {
        touch(root, &format!("{lane}/.claude/settings.local.json"));
        touch(root, &format!("{lane}/src/lib.rs"));
        let logs = root.join("logs").join(lane);
        write_session(
            &logs,
            &format!("{lane}-s1"),
            "2024-05-01T10:00:00Z",
            &[("2024-05-01T10:01:00Z", "user")],
            Some("2024-05-01T10:30:00Z"),
        );
        write_raw(&logs, &format!("{lane}-s1"), 2);
        for name in ["start.zip", "end.zip", "diff.patch"] {
            touch(root, &format!("snapshots/{lane}_{name}"));
        }
    }
}
