use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Remote object store endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the storage service, e.g. `https://<project>.supabase.co`
    pub url: String,
    pub api_key: String,
    /// Bucket receiving submissions
    pub bucket: String,
    /// Bucket holding the sprint configuration document
    #[serde(default = "default_setup_bucket")]
    pub setup_bucket: String,
    #[serde(default = "default_sprint_config_path")]
    pub sprint_config_path: String,
    /// Skip the remote config fetch and upload under this folder
    #[serde(default)]
    pub sprint_folder: Option<String>,
}

fn default_setup_bucket() -> String {
    "setup-files".to_string()
}

fn default_sprint_config_path() -> String {
    "config/sprint_config.json".to_string()
}

impl RemoteConfig {
    /// Endpoint for tus resumable uploads.
    pub fn resumable_endpoint(&self) -> String {
        format!(
            "{}/storage/v1/upload/resumable",
            self.url.trim_end_matches('/')
        )
    }

    /// URL of the sprint configuration object.
    pub fn sprint_config_url(&self) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.url.trim_end_matches('/'),
            self.setup_bucket,
            self.sprint_config_path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Treat HTTP 403 as a path conflict instead of a terminal failure.
    /// The storage service answers 403 when an object already exists.
    #[serde(default = "default_forbidden_as_conflict")]
    pub forbidden_as_conflict: bool,
}

fn default_forbidden_as_conflict() -> bool {
    true
}

fn default_workers() -> usize {
    5
}

fn default_max_versions() -> u32 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_chunk_size() -> usize {
    10 * 1024 * 1024
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_versions: default_max_versions(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            chunk_size_bytes: default_chunk_size(),
            request_timeout_secs: default_request_timeout(),
            forbidden_as_conflict: default_forbidden_as_conflict(),
        }
    }
}

impl UploadConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = directories::ProjectDirs::from("", "", "lanepost")
        .context("Could not determine config directory")?
        .config_dir()
        .to_path_buf();
    Ok(dir)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Create it with a [remote] section (url, api_key, bucket) or pass --config.",
            path.display()
        );
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
}

pub fn parse(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;

    if config.upload.workers == 0 {
        anyhow::bail!("upload.workers must be at least 1");
    }
    if config.upload.max_versions == 0 || config.upload.retry_attempts == 0 {
        anyhow::bail!("upload.max_versions and upload.retry_attempts must be at least 1");
    }
    if config.upload.chunk_size_bytes == 0 {
        anyhow::bail!("upload.chunk_size_bytes must be positive");
    }

    Ok(config)
}
