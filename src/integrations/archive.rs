//! Zip archives of lane working trees and of the snapshots directory.

use super::SnapshotProducer;
use crate::util::relative_slash_path;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Path components never packed into a working-tree snapshot.
const EXCLUDED_PARTS: [&str; 9] = [
    ".git",
    ".claude",
    ".DS_Store",
    "__pycache__",
    ".vscode",
    ".idea",
    "node_modules",
    ".pytest_cache",
    ".mypy_cache",
];

/// Dotfiles kept even though hidden paths are skipped.
const KEPT_DOTFILES: [&str; 3] = [".gitignore", ".env.example", ".dockerignore"];

const EXCLUDED_SUFFIXES: [&str; 3] = [".pyc", ".pyo", ".DS_Store"];

/// Whether a path relative to the lane root stays out of its snapshot.
pub fn is_excluded(relative: &Path) -> bool {
    let excluded_part = relative.components().any(|c| {
        let part = c.as_os_str().to_string_lossy();
        (EXCLUDED_PARTS.contains(&&*part) || part.starts_with('.')) && !KEPT_DOTFILES.contains(&&*part)
    });
    excluded_part
        || relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|n| EXCLUDED_SUFFIXES.iter().any(|s| n.ends_with(s)))
}

/// Deflate every regular file under `source_dir` into `dest`, replacing it.
///
/// Entry names are slash-separated paths relative to `source_dir`, under
/// `prefix/` when a prefix is given. Returns the number of files written.
pub fn zip_directory(source_dir: &Path, dest: &Path, prefix: &str, skip: fn(&Path) -> bool) -> Result<usize> {
    if dest.exists() {
        std::fs::remove_file(dest).with_context(|| format!("Failed to replace {}", dest.display()))?;
    }

    let written = write_entries(source_dir, dest, prefix, skip);
    if written.is_err() {
        crate::util::remove_file_quietly(dest);
    }
    written
}

fn write_entries(source_dir: &Path, dest: &Path, prefix: &str, skip: fn(&Path) -> bool) -> Result<usize> {
    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path().strip_prefix(source_dir).map_or(true, |rel| !skip(rel)));

    let mut count = 0;
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", source_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_slash_path(source_dir, entry.path()) else {
            continue;
        };
        let name = if prefix.is_empty() {
            relative
        } else {
            format!("{}/{}", prefix, relative)
        };

        zip.start_file(name.clone(), options)
            .with_context(|| format!("Failed to add {} to {}", name, dest.display()))?;
        let mut input =
            File::open(entry.path()).with_context(|| format!("Failed to open {}", entry.path().display()))?;
        std::io::copy(&mut input, &mut zip)
            .with_context(|| format!("Failed to compress {}", entry.path().display()))?;
        count += 1;
    }

    zip.finish()
        .with_context(|| format!("Failed to finish {}", dest.display()))?;
    Ok(count)
}

/// Working-tree snapshots, untracked files included.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipSnapshot;

#[async_trait]
impl SnapshotProducer for ZipSnapshot {
    async fn snapshot(&self, source_dir: &Path, dest: &Path) -> Result<()> {
        let source = source_dir.to_path_buf();
        let target = dest.to_path_buf();
        let files = tokio::task::spawn_blocking(move || zip_directory(&source, &target, "", is_excluded))
            .await
            .context("Snapshot task failed")??;
        tracing::debug!("Packed {} files from {} into {}", files, source_dir.display(), dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn entries(zip_path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn exclusion_rules() {
        assert!(is_excluded(Path::new(".git/config")));
        assert!(is_excluded(Path::new("web/node_modules/x/index.js")));
        assert!(is_excluded(Path::new(".env")));
        assert!(is_excluded(Path::new("pkg/mod.cpython-311.pyc")));
        assert!(is_excluded(Path::new("assets/Icon.DS_Store")));
        assert!(!is_excluded(Path::new(".gitignore")));
        assert!(!is_excluded(Path::new("deploy/.dockerignore")));
        assert!(!is_excluded(Path::new("src/main.rs")));
    }

    #[tokio::test]
    async fn snapshot_includes_untracked_files_and_skips_litter() {
        let dir = tempfile::tempdir().unwrap();
        let lane = dir.path().join("model_a");
        touch(&lane, "src/lib.rs");
        touch(&lane, "new_file_never_committed.py");
        touch(&lane, ".gitignore");
        touch(&lane, ".git/HEAD");
        touch(&lane, ".claude/settings.local.json");
        touch(&lane, "__pycache__/x.cpython-311.pyc");
        let dest = dir.path().join("model_a_end.zip");
        fs::write(&dest, "stale").unwrap();

        ZipSnapshot.snapshot(&lane, &dest).await.unwrap();

        assert_eq!(
            entries(&dest),
            vec![".gitignore", "new_file_never_committed.py", "src/lib.rs"]
        );
    }

    #[test]
    fn prefixed_archive_keeps_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = dir.path().join("snapshots");
        touch(&snapshots, "model_a_start.zip");
        touch(&snapshots, "nested/.hidden");
        let dest = dir.path().join("snapshots.zip");

        let count = zip_directory(&snapshots, &dest, "snapshots", |_| false).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            entries(&dest),
            vec!["snapshots/model_a_start.zip", "snapshots/nested/.hidden"]
        );
    }
}
