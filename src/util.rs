//! Utility functions and helpers.

use std::path::Path;

/// `path` relative to `root`, joined with forward slashes on every platform.
///
/// Returns `None` when `path` is not under `root`.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Remove a file if it exists, logging anything other than "not found".
pub fn remove_file_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_relative_slash_path() {
        let root = PathBuf::from("/exp");
        let path = root.join("logs").join("model_a").join("session_x.jsonl");
        assert_eq!(
            relative_slash_path(&root, &path).as_deref(),
            Some("logs/model_a/session_x.jsonl")
        );
        assert_eq!(relative_slash_path(&root, Path::new("/other/file")), None);
        assert_eq!(relative_slash_path(&root, &root), None);
    }

    #[test]
    fn test_remove_file_quietly_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        remove_file_quietly(&path); // Should not panic
        std::fs::write(&path, "{}").unwrap();
        remove_file_quietly(&path);
        assert!(!path.exists());
    }
}
