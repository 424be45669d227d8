//! `git` CLI adapter for end-of-run diffs.

use super::DiffProducer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Paths kept out of diffs.
const DIFF_EXCLUDES: [&str; 8] = [
    ":!.claude",
    ":!**/.mypy_cache",
    ":!**/__pycache__",
    ":!**/.pytest_cache",
    ":!**/.DS_Store",
    ":!**/node_modules",
    ":!**/.vscode",
    ":!**/.idea",
];

/// Untracked paths never marked intent-to-add.
const UNTRACKED_EXCLUDES: [&str; 8] = [
    ".claude/",
    "__pycache__/",
    "node_modules/",
    ".mypy_cache/",
    ".pytest_cache/",
    ".DS_Store",
    ".vscode/",
    ".idea/",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

async fn git(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.join(" ")))
}

async fn git_ok(dir: &Path, args: &[&str]) -> Result<String> {
    let output = git(dir, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl DiffProducer for GitCli {
    async fn diff(&self, repo_dir: &Path, patch_path: &Path, base_revision: &str) -> Result<()> {
        if base_revision.is_empty() {
            anyhow::bail!("no base commit");
        }

        let untracked = git_ok(repo_dir, &["ls-files", "--others", "--exclude-standard"]).await?;
        for file in untracked.lines().map(str::trim).filter(|f| !f.is_empty()) {
            if UNTRACKED_EXCLUDES.iter().any(|p| file.contains(p)) {
                continue;
            }
            if let Err(e) = git_ok(repo_dir, &["add", "-N", "--", file]).await {
                tracing::debug!("Could not mark {} intent-to-add: {}", file, e);
            }
        }

        let mut args = vec!["diff", base_revision, "--", "."];
        args.extend(DIFF_EXCLUDES);
        let patch = git_ok(repo_dir, &args).await?;

        tokio::fs::write(patch_path, patch)
            .await
            .with_context(|| format!("Failed to write {}", patch_path.display()))
    }
}
