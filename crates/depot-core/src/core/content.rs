//! Path-addressed file persistence with pre-overwrite history snapshots.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use depot_domain::{resolve_under_root, HISTORY_DIR};

use crate::error::{storage_io_error, DepotError};

/// Outcome of a content-store write: where the bytes landed and how many.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Write `bytes` to `relative` under the project root, preserving any
/// existing file into the history area first.
///
/// The backup must complete before the overwrite: a failed backup leaves the
/// original untouched and fails the operation. Concurrent writes to the same
/// relative path are not serialized; the last writer wins and the loser's
/// snapshot may be incomplete.
pub fn put(
    project_root: &Path,
    relative: &str,
    bytes: &[u8],
    commit_id: &str,
) -> Result<StoredFile> {
    let target = resolve_checked(project_root, relative)?;
    write_new_content(project_root, &target, relative, bytes, commit_id)
        .map_err(storage_io_error)?;
    debug!(
        path = %target.display(),
        size = bytes.len(),
        commit_id,
        "content stored"
    );
    Ok(StoredFile {
        path: target,
        size: bytes.len() as u64,
    })
}

/// Remove `relative` from the current tree by moving it into the history
/// area keyed by `commit_id`, so a delete commit stays recoverable. Reported
/// size is always zero; deleting an already-absent path is a no-op.
pub fn delete(project_root: &Path, relative: &str, commit_id: &str) -> Result<StoredFile> {
    let target = resolve_checked(project_root, relative)?;
    if target.exists() {
        let backup = history_path(project_root, commit_id, relative);
        ensure_parent(&backup).map_err(storage_io_error)?;
        fs::rename(&target, &backup)
            .with_context(|| {
                format!(
                    "failed to move {} into history at {}",
                    target.display(),
                    backup.display()
                )
            })
            .map_err(storage_io_error)?;
        debug!(path = %target.display(), commit_id, "content moved to history");
    }
    Ok(StoredFile {
        path: target,
        size: 0,
    })
}

/// Location a pre-overwrite snapshot of `relative` is kept at for a commit.
pub fn history_path(project_root: &Path, commit_id: &str, relative: &str) -> PathBuf {
    project_root.join(HISTORY_DIR).join(commit_id).join(relative)
}

fn resolve_checked(project_root: &Path, relative: &str) -> Result<PathBuf> {
    resolve_under_root(project_root, relative).ok_or_else(|| {
        DepotError::AccessDenied(format!("path {relative} escapes the project root")).into()
    })
}

fn write_new_content(
    project_root: &Path,
    target: &Path,
    relative: &str,
    bytes: &[u8],
    commit_id: &str,
) -> Result<()> {
    if target.exists() {
        let backup = history_path(project_root, commit_id, relative);
        ensure_parent(&backup)?;
        fs::copy(target, &backup).with_context(|| {
            format!(
                "failed to back up {} into history at {}",
                target.display(),
                backup.display()
            )
        })?;
    }
    ensure_parent(target)?;
    fs::write(target, bytes)
        .with_context(|| format!("failed to write content at {}", target.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_overwrite_preserves_previous_version() -> Result<()> {
        let root = tempfile::tempdir()?;
        put(root.path(), "a.txt", b"hello", "c1")?;
        let stored = put(root.path(), "a.txt", b"world", "c2")?;

        assert_eq!(fs::read(&stored.path)?, b"world");
        let snapshot = history_path(root.path(), "c2", "a.txt");
        assert_eq!(fs::read(snapshot)?, b"hello", "pre-overwrite bytes kept under c2");
        Ok(())
    }

    #[test]
    fn first_write_creates_no_history() {
        let root = tempfile::tempdir().expect("tempdir");
        put(root.path(), "src/lib.rs", b"pub fn x() {}", "c1").expect("put");
        assert!(!root.path().join(HISTORY_DIR).exists());
    }

    #[test]
    fn traversal_is_rejected_without_side_effects() {
        let root = tempfile::tempdir().expect("tempdir");
        let err = put(root.path(), "../../etc/passwd", b"nope", "c1").unwrap_err();
        let depot_err = err
            .downcast_ref::<DepotError>()
            .expect("should produce DepotError");
        assert!(matches!(depot_err, DepotError::AccessDenied(_)));
        assert_eq!(
            fs::read_dir(root.path()).expect("read root").count(),
            0,
            "rejected push must leave the tree untouched"
        );
    }

    #[test]
    fn delete_moves_into_history_and_reports_zero() -> Result<()> {
        let root = tempfile::tempdir()?;
        put(root.path(), "doc/notes.md", b"draft", "c1")?;
        let removed = delete(root.path(), "doc/notes.md", "c2")?;

        assert_eq!(removed.size, 0);
        assert!(!root.path().join("doc/notes.md").exists());
        let snapshot = history_path(root.path(), "c2", "doc/notes.md");
        assert_eq!(fs::read(snapshot)?, b"draft");
        Ok(())
    }

    #[test]
    fn delete_of_missing_path_is_a_noop() -> Result<()> {
        let root = tempfile::tempdir()?;
        let removed = delete(root.path(), "ghost.txt", "c1")?;
        assert_eq!(removed.size, 0);
        assert!(!root.path().join(HISTORY_DIR).exists());
        Ok(())
    }
}
