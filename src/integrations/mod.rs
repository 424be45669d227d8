//! Collaborators outside the process: the storage service, `git` and the
//! snapshot archiver.

pub mod archive;
pub mod git;
pub mod remote_config;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::path::Path;
use std::time::Duration;

/// Shared HTTP client for small API requests to enable connection pooling
pub static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(5)
        .build()
        .expect("Failed to create HTTP client")
});

/// Packs a working directory into an archive at `dest`.
#[async_trait]
pub trait SnapshotProducer: Send + Sync {
    async fn snapshot(&self, source_dir: &Path, dest: &Path) -> Result<()>;
}

/// Writes the changes of a working directory since `base_revision` to `patch_path`.
#[async_trait]
pub trait DiffProducer: Send + Sync {
    async fn diff(&self, repo_dir: &Path, patch_path: &Path, base_revision: &str) -> Result<()>;
}
