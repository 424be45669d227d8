//! Experiment manifest and the submission version ledger.
//!
//! `manifest.json` carries one piece of state between runs:
//! `last_submission_version`. Version 0 uploads to `<folder>/<task>`, later
//! versions to `<folder>/<task>_v<n>`.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Fields every manifest must carry.
pub const REQUIRED_FIELDS: [&str; 5] = ["expert_name", "task_id", "timestamp", "repo_url", "assignments"];

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{0} not found. Make sure you're in the experiment directory.")]
    NotFound(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid manifest, missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// Parsed `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub expert_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub task_id: String,
    pub timestamp: String,
    pub repo_url: String,
    pub assignments: Value,
    #[serde(default)]
    pub last_submission_version: Option<u32>,
    /// Everything else, preserved on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {}",
            other
        ))),
    }
}

impl Manifest {
    /// Validate and decode a manifest document, reporting every missing field.
    pub fn from_value(value: Value, path: &str) -> Result<Self, ManifestError> {
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| value.get(**field).is_none())
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ManifestError::MissingFields(missing));
        }

        serde_json::from_value(value).map_err(|source| ManifestError::Json {
            path: path.to_string(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let display = path.display().to_string();
        if !path.is_file() {
            return Err(ManifestError::NotFound(display));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: display.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|source| ManifestError::Json {
            path: display.clone(),
            source,
        })?;
        Self::from_value(value, &display)
    }

    /// First version to attempt on this run.
    pub fn next_version(&self) -> u32 {
        next_version(self.last_submission_version)
    }
}

/// `None` → 0, `Some(v)` → `v + 1`.
pub fn next_version(last: Option<u32>) -> u32 {
    match last {
        None => 0,
        Some(v) => v.saturating_add(1),
    }
}

/// Remote folder for a version.
pub fn path_for(folder: &str, task_id: &str, version: u32) -> String {
    let folder = folder.trim_end_matches('/');
    if version == 0 {
        format!("{}/{}", folder, task_id)
    } else {
        format!("{}/{}_v{}", folder, task_id, version)
    }
}

/// Durable record of the last version that received any file.
pub trait VersionLedger: Send {
    fn last_version(&self) -> Option<u32>;

    /// Record `version` as the last submission version. Idempotent.
    fn persist(&mut self, version: u32) -> anyhow::Result<()>;
}

/// Ledger backed by the `last_submission_version` field of `manifest.json`.
#[derive(Debug, Clone)]
pub struct ManifestLedger {
    path: PathBuf,
    last: Option<u32>,
}

impl ManifestLedger {
    pub fn open(path: &Path) -> Result<Self, ManifestError> {
        let manifest = Manifest::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            last: manifest.last_submission_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VersionLedger for ManifestLedger {
    fn last_version(&self) -> Option<u32> {
        self.last
    }

    fn persist(&mut self, version: u32) -> anyhow::Result<()> {
        write_last_version(&self.path, version)?;
        self.last = Some(version);
        Ok(())
    }
}

/// Rewrite `last_submission_version` in place, keeping all other fields.
pub fn write_last_version(path: &Path, version: u32) -> anyhow::Result<()> {
    use anyhow::Context;

    let mut file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.lock_exclusive()?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let mut manifest: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let Some(object) = manifest.as_object_mut() else {
        file.unlock()?;
        anyhow::bail!("{} is not a JSON object", path.display());
    };
    object.insert("last_submission_version".to_string(), Value::from(version));

    let rendered = serde_json::to_string_pretty(&manifest)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(rendered.as_bytes())?;
    file.sync_all()?;

    file.unlock()?;
    Ok(())
}
