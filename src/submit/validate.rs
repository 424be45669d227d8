//! Pre-flight checks on an experiment directory and the artifact listing.

use super::manifest::MANIFEST_FILE;
use super::scheduler::Artifact;
use crate::session::merger::{list_consolidated, list_raw, session_id_from_file_name, LANES};
use crate::session::reader::{first_session_start, has_session_summary};
use crate::util::relative_slash_path;
use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

pub const REQUIRED_FILES: [&str; 3] = [
    MANIFEST_FILE,
    "model_a/.claude/settings.local.json",
    "model_b/.claude/settings.local.json",
];

pub const REQUIRED_DIRS: [&str; 4] = ["model_a", "model_b", "logs", "snapshots"];

pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Single archive of `snapshots/` uploaded in place of its files.
pub const SNAPSHOTS_ZIP: &str = "snapshots.zip";

/// Names and extensions never uploaded from the lanes' `.claude` directories.
const IGNORED_NAMES: [&str; 4] = ["__pycache__", ".DS_Store", "Thumbs.db", "desktop.ini"];
const IGNORED_EXTENSIONS: [&str; 2] = ["pyc", "pyo"];

/// Every problem that blocks submission, gathered in one pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Validation failed:{}", bullet_list(.problems))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|item| format!("\n  - {}", item)).collect()
}

/// Non-fatal findings of a passed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Snapshot files a complete experiment is expected to carry.
pub fn expected_snapshots() -> Vec<String> {
    LANES
        .iter()
        .flat_map(|lane| {
            [
                format!("{lane}_start.zip"),
                format!("{lane}_end.zip"),
                format!("{lane}_diff.patch"),
            ]
        })
        .collect()
}

pub fn validate_experiment(root: &Path) -> Result<ValidationReport, ValidationError> {
    let mut problems = Vec::new();
    let mut warnings = Vec::new();

    for file in REQUIRED_FILES {
        if !root.join(file).is_file() {
            problems.push(format!("missing file {}", file));
        }
    }
    for dir in REQUIRED_DIRS {
        if !root.join(dir).is_dir() {
            problems.push(format!("missing directory {}/", dir));
        }
    }

    let logs_dir = root.join("logs");
    if logs_dir.is_dir() {
        for lane in LANES {
            check_lane_logs(&logs_dir.join(lane), lane, &mut problems, &mut warnings);
        }
    }

    let snapshots = root.join(SNAPSHOTS_DIR);
    if snapshots.is_dir() {
        let missing: Vec<String> = expected_snapshots()
            .into_iter()
            .filter(|name| !snapshots.join(name).exists())
            .map(|name| format!("{}/{}", SNAPSHOTS_DIR, name))
            .collect();
        if !missing.is_empty() {
            warnings.push(format!("some snapshots are missing: {}", missing.join(", ")));
        }
    }

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    if problems.is_empty() {
        Ok(ValidationReport { warnings })
    } else {
        Err(ValidationError { problems })
    }
}

fn check_lane_logs(dir: &Path, lane: &str, problems: &mut Vec<String>, warnings: &mut Vec<String>) {
    let consolidated = list_consolidated(dir).unwrap_or_default();
    let session_file = match consolidated.as_slice() {
        [] => {
            problems.push(format!("no session log in logs/{}/ (expected session_*.jsonl)", lane));
            return;
        }
        [one] => one,
        many => {
            problems.push(format!(
                "found {} session logs in logs/{}/, expected exactly 1 (run `lanepost merge` first)",
                many.len(),
                lane
            ));
            return;
        }
    };

    let name = file_name(session_file);
    let session_id = session_id_from_file_name(&name).unwrap_or_default().to_string();

    match has_session_summary(session_file) {
        Ok(true) => {}
        Ok(false) => warnings.push(format!("{}: session_summary event not found in {}", lane, name)),
        Err(e) => warnings.push(format!("{}: failed to read {}: {}", lane, name, e)),
    }

    let raw = list_raw(dir).unwrap_or_default();
    match raw.first() {
        None => warnings.push(format!(
            "{}: raw session file session_{}_raw.jsonl not found",
            lane, session_id
        )),
        Some(raw_file) => {
            let raw_name = file_name(raw_file);
            let raw_id = session_id_from_file_name(&raw_name).unwrap_or_default();
            if raw_id != session_id {
                warnings.push(format!(
                    "{}: raw session file has different session ID (expected '{}', found '{}')",
                    lane, session_id, raw_id
                ));
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        IGNORED_NAMES.contains(&name.as_ref())
    }) || path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IGNORED_EXTENSIONS.contains(&e))
}

/// Every file to publish, sorted by relative path.
///
/// `manifest.json`, all `logs/**/*.jsonl`, `snapshots.zip`, and the lanes'
/// `.claude/` settings minus editor and bytecode litter.
pub fn collect_artifacts(root: &Path) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();

    for name in [MANIFEST_FILE, SNAPSHOTS_ZIP] {
        let path = root.join(name);
        if path.is_file() {
            artifacts.push(Artifact {
                relative: name.to_string(),
                local: path,
            });
        }
    }

    let mut walk = |dir: &Path, keep: &dyn Fn(&Path) -> bool| -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() || !keep(entry.path()) {
                continue;
            }
            let relative = relative_slash_path(root, entry.path())
                .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;
            artifacts.push(Artifact {
                local: entry.into_path(),
                relative,
            });
        }
        Ok(())
    };

    walk(&root.join("logs"), &|p: &Path| {
        p.extension().and_then(|e| e.to_str()) == Some("jsonl")
    })?;
    for lane in LANES {
        walk(&root.join(lane).join(".claude"), &|p: &Path| {
            p.strip_prefix(root).map_or(true, |rel| !is_ignored(rel))
        })?;
    }

    artifacts.sort_by(|a, b| a.relative.cmp(&b.relative));
    artifacts.dedup_by(|a, b| a.relative == b.relative);
    Ok(artifacts)
}

/// Base commit recorded in a lane's first `session_start`, if any.
pub fn base_commit_for_lane(root: &Path, lane: &str) -> Option<String> {
    let files = list_consolidated(&root.join("logs").join(lane)).ok()?;
    files.iter().find_map(|path| {
        let start = first_session_start(path).ok().flatten()?;
        start
            .payload
            .get("git_metadata")?
            .get("base_commit")?
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}
