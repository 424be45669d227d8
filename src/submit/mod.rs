//! Experiment submission
//!
//! ```text
//! prepare:  end snapshots ──► merge lanes ──► validate ──► collect artifacts
//! execute:  scheduler (version v, v+1, ...) ──► ledger ──► submission summary
//! ```

pub mod manifest;
pub mod retry;
pub mod scheduler;
pub mod transfer;
pub mod validate;

pub use manifest::{Manifest, ManifestLedger, VersionLedger};
pub use scheduler::{Artifact, PublishOutcome, UploadScheduler};
pub use transfer::{FailureKind, TransferError, Transport, TusTransport};
pub use validate::{ValidationError, ValidationReport};

use crate::integrations::archive::zip_directory;
use crate::integrations::{DiffProducer, SnapshotProducer};
use crate::session::merger::{ExperimentMergeReport, LANES};
use crate::session::merge_experiment;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "submission_summary.json";

/// Files created during a submission that never outlive it.
pub const TEMP_FILES: [&str; 2] = [validate::SNAPSHOTS_ZIP, SUMMARY_FILE];

/// Everything known before the first byte is sent.
#[derive(Debug, Clone)]
pub struct SubmissionPlan {
    pub root: PathBuf,
    pub manifest: Manifest,
    pub dest_folder: String,
    pub start_version: u32,
    pub artifacts: Vec<Artifact>,
    pub merge: ExperimentMergeReport,
    pub validation: ValidationReport,
}

impl SubmissionPlan {
    pub fn upload_path(&self) -> String {
        manifest::path_for(&self.dest_folder, &self.manifest.task_id, self.start_version)
    }
}

/// Written next to the manifest and uploaded after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionSummary {
    pub submission_timestamp: String,
    pub user_folder_name: String,
    pub expert_name: String,
    pub task_id: String,
    pub experiment_timestamp: String,
    pub last_submission_version: Option<u32>,
    pub uploaded_files_count: usize,
    pub uploaded_files: Vec<String>,
    pub submission_metadata: SubmissionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionMetadata {
    pub submit_script_version: String,
    pub upload_path: String,
}

/// Result of [`execute`].
#[derive(Debug)]
pub struct SubmissionResult {
    pub publish: PublishOutcome,
    /// Whether `submission_summary.json` reached the remote store
    pub summary_uploaded: bool,
}

/// Refresh `snapshots/<lane>_end.zip` and `snapshots/<lane>_diff.patch`.
///
/// Every failure is a warning; missing snapshots surface again in validation.
pub async fn take_end_snapshots(
    root: &Path,
    snapshots: &dyn SnapshotProducer,
    diffs: &dyn DiffProducer,
) -> Result<()> {
    let snapshot_dir = root.join(validate::SNAPSHOTS_DIR);
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("Failed to create {}", snapshot_dir.display()))?;

    for lane in LANES {
        let lane_dir = root.join(lane);
        if !lane_dir.is_dir() {
            tracing::warn!("Skipping end snapshot for {} - directory not found", lane);
            continue;
        }

        let zip = snapshot_dir.join(format!("{lane}_end.zip"));
        match snapshots.snapshot(&lane_dir, &zip).await {
            Ok(()) => tracing::info!("Created end snapshot for {}", lane),
            Err(e) => tracing::warn!("Failed to create end snapshot for {}: {:#}", lane, e),
        }

        let Some(base) = validate::base_commit_for_lane(root, lane) else {
            tracing::warn!("Could not find base commit for {} - skipping diff", lane);
            continue;
        };
        let patch = snapshot_dir.join(format!("{lane}_diff.patch"));
        match diffs.diff(&lane_dir, &patch, &base).await {
            Ok(()) => tracing::info!(
                "Created diff patch for {} (from {})",
                lane,
                base.get(..8).unwrap_or(&base)
            ),
            Err(e) => tracing::warn!("Failed to create diff patch for {}: {:#}", lane, e),
        }
    }
    Ok(())
}

/// Pack `snapshots/` into `snapshots.zip` at the experiment root.
///
/// Entries keep their `snapshots/` prefix. Returns `None` without a
/// snapshots directory.
pub fn pack_snapshots(root: &Path) -> Result<Option<PathBuf>> {
    let snapshot_dir = root.join(validate::SNAPSHOTS_DIR);
    if !snapshot_dir.is_dir() {
        return Ok(None);
    }
    let dest = root.join(validate::SNAPSHOTS_ZIP);
    let count = zip_directory(&snapshot_dir, &dest, validate::SNAPSHOTS_DIR, |_| false)?;
    tracing::info!("Created snapshots archive {} ({} files)", validate::SNAPSHOTS_ZIP, count);
    Ok(Some(dest))
}

/// Snapshot, merge, validate and list an experiment for upload.
pub async fn prepare(
    root: &Path,
    dest_folder: &str,
    snapshots: &dyn SnapshotProducer,
    diffs: &dyn DiffProducer,
) -> Result<SubmissionPlan> {
    let manifest = Manifest::read(&root.join(manifest::MANIFEST_FILE))?;
    tracing::info!("Expert: {}, task: {}", manifest.expert_name, manifest.task_id);

    take_end_snapshots(root, snapshots, diffs).await?;

    // A missing logs/ directory is reported by validation with everything else
    let merge = match merge_experiment(root) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("Session merge skipped: {:#}", e);
            ExperimentMergeReport::default()
        }
    };
    if !merge.is_success() {
        tracing::warn!("Session merge encountered issues, continuing anyway");
    }

    let validation = validate::validate_experiment(root)?;

    if let Err(e) = pack_snapshots(root) {
        tracing::warn!("Failed to create snapshots archive: {:#}", e);
    }
    let artifacts = validate::collect_artifacts(root)?;
    if artifacts.is_empty() {
        anyhow::bail!("No files found to upload in {}", root.display());
    }

    let start_version = manifest.next_version();
    Ok(SubmissionPlan {
        root: root.to_path_buf(),
        manifest,
        dest_folder: dest_folder.to_string(),
        start_version,
        artifacts,
        merge,
        validation,
    })
}

/// Publish a prepared plan, then write and upload the submission summary.
///
/// Temporary files are removed whatever the outcome.
pub async fn execute(
    plan: &SubmissionPlan,
    scheduler: &UploadScheduler,
    ledger: &mut dyn VersionLedger,
) -> Result<SubmissionResult> {
    let result = run(plan, scheduler, ledger).await;
    cleanup(&plan.root);
    result
}

async fn run(
    plan: &SubmissionPlan,
    scheduler: &UploadScheduler,
    ledger: &mut dyn VersionLedger,
) -> Result<SubmissionResult> {
    let root = plan.root.clone();
    let publish = scheduler
        .publish(
            &plan.dest_folder,
            &plan.manifest.task_id,
            plan.start_version,
            || validate::collect_artifacts(&root),
            ledger,
        )
        .await?;

    if !publish.success {
        return Ok(SubmissionResult {
            publish,
            summary_uploaded: false,
        });
    }

    let upload_path = publish.upload_path().unwrap_or_default().to_string();
    let uploaded_files = publish
        .final_attempt()
        .map(|a| a.tasks.iter().map(|t| t.relative.clone()).collect())
        .unwrap_or_default();
    let summary = build_summary(&plan.manifest, &upload_path, ledger.last_version(), uploaded_files);

    let summary_path = plan.root.join(SUMMARY_FILE);
    let summary_uploaded = match write_summary(&summary_path, &summary) {
        Ok(()) => {
            let remote = format!("{}/{}", upload_path, SUMMARY_FILE);
            match scheduler.upload_one(&summary_path, &remote).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Created submission summary but failed to upload it: {}", e);
                    false
                }
            }
        }
        Err(e) => {
            tracing::warn!("Failed to create submission summary: {:#}", e);
            false
        }
    };

    Ok(SubmissionResult {
        publish,
        summary_uploaded,
    })
}

pub fn build_summary(
    manifest: &Manifest,
    upload_path: &str,
    last_version: Option<u32>,
    uploaded_files: Vec<String>,
) -> SubmissionSummary {
    SubmissionSummary {
        submission_timestamp: Utc::now().to_rfc3339(),
        user_folder_name: upload_path.to_string(),
        expert_name: manifest.expert_name.clone(),
        task_id: manifest.task_id.clone(),
        experiment_timestamp: manifest.timestamp.clone(),
        last_submission_version: last_version,
        uploaded_files_count: uploaded_files.len(),
        uploaded_files,
        submission_metadata: SubmissionMetadata {
            submit_script_version: env!("CARGO_PKG_VERSION").to_string(),
            upload_path: format!("{}/", upload_path),
        },
    }
}

fn write_summary(path: &Path, summary: &SubmissionSummary) -> Result<()> {
    let rendered = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))
}

/// Remove temporary submission files from an experiment root.
pub fn cleanup(root: &Path) {
    for name in TEMP_FILES {
        crate::util::remove_file_quietly(&root.join(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_fields() {
        let manifest = Manifest::from_value(
            json!({
                "expert_name": "Ada",
                "task_id": "t-9",
                "timestamp": "20240501_101010",
                "repo_url": "https://example.com/r.git",
                "assignments": {}
            }),
            "manifest.json",
        )
        .unwrap();

        let summary = build_summary(&manifest, "sprint/t-9_v1", Some(1), vec!["manifest.json".into()]);
        assert_eq!(summary.user_folder_name, "sprint/t-9_v1");
        assert_eq!(summary.uploaded_files_count, 1);
        assert_eq!(summary.submission_metadata.upload_path, "sprint/t-9_v1/");
        assert_eq!(summary.experiment_timestamp, "20240501_101010");

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["last_submission_version"], json!(1));
    }

    #[test]
    fn cleanup_removes_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SUMMARY_FILE), "{}").unwrap();
        std::fs::create_dir(dir.path().join("snapshots")).unwrap();
        std::fs::write(dir.path().join("snapshots/model_a_start.zip"), "zip").unwrap();
        let packed = pack_snapshots(dir.path()).unwrap().unwrap();
        assert!(packed.is_file());

        cleanup(dir.path());
        assert!(!dir.path().join(SUMMARY_FILE).exists());
        assert!(!packed.exists());
        assert!(dir.path().join("snapshots/model_a_start.zip").exists());
    }

    #[test]
    fn pack_without_snapshots_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(pack_snapshots(dir.path()).unwrap(), None);
    }
}
