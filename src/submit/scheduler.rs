//! Versioned batch publishing.
//!
//! One attempt uploads every artifact under a single version path with a
//! bounded worker pool. Conflicts move the whole batch to the next version;
//! terminal failures stop the run.

use super::manifest::{path_for, VersionLedger};
use super::retry::{RetryPolicy, Sleeper, TokioSleeper};
use super::transfer::{transfer_with_retry, FailureKind, TransferError, Transport};
use crate::config::UploadConfig;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;

/// A file to publish, with its path relative to the experiment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local: PathBuf,
    /// Forward-slash relative path, appended to the version path remotely
    pub relative: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Succeeded,
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub local: PathBuf,
    /// Path relative to the experiment root
    pub relative: String,
    pub remote: String,
    pub state: TaskState,
    /// Last error message, if the task failed
    pub error: Option<String>,
}

impl UploadTask {
    fn pending(artifact: Artifact, upload_path: &str) -> Self {
        Self {
            remote: format!("{}/{}", upload_path, artifact.relative),
            local: artifact.local,
            relative: artifact.relative,
            state: TaskState::Pending,
            error: None,
        }
    }
}

/// Everything that happened under one version.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub version: u32,
    pub upload_path: String,
    pub tasks: Vec<UploadTask>,
}

impl AttemptReport {
    pub fn succeeded(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Succeeded)
            .count()
    }

    pub fn failed(&self, kind: FailureKind) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Failed(kind))
            .count()
    }

    fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Succeeded)
    }
}

/// Result of [`UploadScheduler::publish`].
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub success: bool,
    pub had_conflict: bool,
    /// Files that succeeded in the final attempt
    pub uploaded: usize,
    pub final_version: u32,
    pub attempts: Vec<AttemptReport>,
}

impl PublishOutcome {
    pub fn final_attempt(&self) -> Option<&AttemptReport> {
        self.attempts.last()
    }

    /// Upload path of the final attempt.
    pub fn upload_path(&self) -> Option<&str> {
        self.final_attempt().map(|a| a.upload_path.as_str())
    }
}

pub struct UploadScheduler {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    workers: usize,
    max_versions: u32,
    forbidden_as_conflict: bool,
}

impl UploadScheduler {
    pub fn new(transport: Arc<dyn Transport>, config: &UploadConfig) -> Self {
        Self {
            transport,
            sleeper: Arc::new(TokioSleeper),
            policy: RetryPolicy::new(config.retry_attempts, config.retry_base_delay()),
            workers: config.workers.max(1),
            max_versions: config.max_versions.max(1),
            forbidden_as_conflict: config.forbidden_as_conflict,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Upload a single file outside any batch, with the same retry policy.
    pub async fn upload_one(&self, local: &std::path::Path, remote: &str) -> Result<(), TransferError> {
        transfer_with_retry(
            self.transport.as_ref(),
            &self.policy,
            self.sleeper.as_ref(),
            local,
            remote,
        )
        .await
    }

    /// Publish all artifacts under `dest_folder/task_id[_vN]`, starting at
    /// `start_version` and moving up on conflict.
    ///
    /// `list_artifacts` runs before every attempt so the batch reflects the
    /// directory as it is at that moment.
    pub async fn publish<F>(
        &self,
        dest_folder: &str,
        task_id: &str,
        start_version: u32,
        mut list_artifacts: F,
        ledger: &mut dyn VersionLedger,
    ) -> Result<PublishOutcome>
    where
        F: FnMut() -> Result<Vec<Artifact>>,
    {
        let mut attempts = Vec::new();
        let mut had_conflict = false;
        let mut version = start_version;

        for attempt_no in 0..self.max_versions {
            let upload_path = path_for(dest_folder, task_id, version);
            let artifacts = list_artifacts()?;
            tracing::info!(
                "Uploading {} files to {} (version {})",
                artifacts.len(),
                upload_path,
                version
            );

            let report = self.run_attempt(version, &upload_path, artifacts, ledger).await;

            let conflicts = report.failed(FailureKind::Conflict);
            let terminal = report.failed(FailureKind::Terminal);
            let transient = report.failed(FailureKind::Transient);
            had_conflict |= conflicts > 0;

            let attempts_left = attempt_no + 1 < self.max_versions;
            let done = report.all_succeeded();
            let uploaded = report.succeeded();
            attempts.push(report);

            if done {
                return Ok(PublishOutcome {
                    success: true,
                    had_conflict,
                    uploaded,
                    final_version: version,
                    attempts,
                });
            }

            if terminal > 0 {
                tracing::error!(
                    "{} file(s) failed with unrecoverable errors at {}",
                    terminal,
                    upload_path
                );
            } else if conflicts > 0 && attempts_left {
                tracing::warn!(
                    "{} file(s) already exist at {}, retrying as version {}",
                    conflicts,
                    upload_path,
                    version + 1
                );
                version += 1;
                continue;
            } else if conflicts > 0 {
                tracing::error!("Still conflicting after {} versions", self.max_versions);
            } else {
                tracing::error!("{} file(s) failed after retries", transient);
            }

            return Ok(PublishOutcome {
                success: false,
                had_conflict,
                uploaded,
                final_version: version,
                attempts,
            });
        }

        // max_versions >= 1, so the loop always returns
        Ok(PublishOutcome {
            success: false,
            had_conflict,
            uploaded: 0,
            final_version: version,
            attempts,
        })
    }

    async fn run_attempt(
        &self,
        version: u32,
        upload_path: &str,
        artifacts: Vec<Artifact>,
        ledger: &mut dyn VersionLedger,
    ) -> AttemptReport {
        let tasks = artifacts
            .into_iter()
            .map(|artifact| UploadTask::pending(artifact, upload_path));

        let mut results = stream::iter(tasks.map(|mut task| async move {
            match transfer_with_retry(
                self.transport.as_ref(),
                &self.policy,
                self.sleeper.as_ref(),
                &task.local,
                &task.remote,
            )
            .await
            {
                Ok(()) => task.state = TaskState::Succeeded,
                Err(e) => {
                    let kind = e.failure_kind(self.forbidden_as_conflict);
                    if kind != FailureKind::Conflict {
                        tracing::warn!("Failed to upload {}: {}", task.local.display(), e);
                    }
                    task.state = TaskState::Failed(kind);
                    task.error = Some(e.to_string());
                }
            }
            task
        }))
        .buffer_unordered(self.workers);

        let mut finished = Vec::new();
        let mut persisted = false;
        while let Some(task) = results.next().await {
            if task.state == TaskState::Succeeded && !persisted {
                persisted = true;
                match ledger.persist(version) {
                    Ok(()) => tracing::info!("Recorded submission version {}", version),
                    Err(e) => tracing::warn!("Could not record submission version {}: {:#}", version, e),
                }
            }
            finished.push(task);
        }
        finished.sort_by(|a, b| a.remote.cmp(&b.remote));

        AttemptReport {
            version,
            upload_path: upload_path.to_string(),
            tasks: finished,
        }
    }
}
