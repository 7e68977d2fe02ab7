//! Bulk download of a project's current tree as a zip archive.
//!
//! The archive is materialized under the storage scratch directory and handed
//! back as a scoped resource: dropping the handle deletes the transient file,
//! so cleanup runs on every exit path once the bytes have been sent.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{debug, warn};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use depot_domain::normalize_entry_path;

use crate::core::audit;
use crate::core::depot::Depot;
use crate::core::repo::resolve_project;
use crate::core::tree::filtered_walk;
use crate::error::{storage_io_error, DepotError};

const STALE_ARCHIVE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A materialized archive awaiting transmission. The transient file is
/// removed when the handle drops.
#[derive(Debug)]
pub struct ArchiveHandle {
    path: PathBuf,
    filename: String,
}

impl ArchiveHandle {
    /// On-disk location of the transient archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Download filename to present to the client.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "transient archive removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to remove transient archive");
            }
        }
    }
}

/// Package the project's current tree for download. Runs the audit pass
/// opportunistically first and bumps the project's download counter.
pub fn pull_archive(depot: &Depot, owner: &str, project: &str) -> Result<ArchiveHandle> {
    audit::run_if_due_logged(depot);
    let (_user, row) = resolve_project(depot, owner, project)?;
    let project_root = depot.project_root(owner, project);
    if !project_root.exists() {
        return Err(DepotError::NotFound(format!("files for {owner}/{project}")).into());
    }
    let handle = export(&project_root, &format!("{project}.zip"), &depot.scratch_dir())?;
    if let Err(err) = depot.catalog().bump_download_count(row.id) {
        warn!(%err, owner, project, "failed to bump download count");
    }
    Ok(handle)
}

/// Write a zip of everything under `project_root` except the reserved
/// subtrees. Entry names are root-relative with forward slashes. Concurrent
/// exports of the same project get distinct transient paths via a random
/// token.
pub fn export(project_root: &Path, archive_name: &str, scratch_dir: &Path) -> Result<ArchiveHandle> {
    fs::create_dir_all(scratch_dir)
        .with_context(|| format!("failed to create {}", scratch_dir.display()))
        .map_err(storage_io_error)?;
    prune_stale_archives(scratch_dir, STALE_ARCHIVE_AGE);

    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let transient = scratch_dir.join(format!("{archive_name}.{token}.partial"));
    let handle = ArchiveHandle {
        path: transient,
        filename: archive_name.to_string(),
    };

    write_archive(project_root, &handle.path).map_err(storage_io_error)?;
    debug!(
        root = %project_root.display(),
        path = %handle.path.display(),
        "archive materialized"
    );
    Ok(handle)
}

fn write_archive(project_root: &Path, out: &Path) -> Result<()> {
    let file = File::create(out)
        .with_context(|| format!("failed to create archive at {}", out.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in filtered_walk(project_root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, root = %project_root.display(), "skipping path during archive walk");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = normalize_entry_path(project_root, entry.path())?;
        let mut source = match File::open(entry.path()) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %entry.path().display(), "skipping unreadable file during archive");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        zip.start_file(rel, options)?;
        io::copy(&mut source, &mut zip)?;
    }
    let mut inner = zip.finish()?;
    inner.flush()?;
    Ok(())
}

fn prune_stale_archives(scratch_dir: &Path, max_age: Duration) {
    let Ok(entries) = fs::read_dir(scratch_dir) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(".partial") {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if now.duration_since(modified).unwrap_or_default() < max_age {
            continue;
        }
        let _ = fs::remove_file(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use depot_domain::HISTORY_DIR;

    fn read_entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).expect("open archive");
        let mut archive = zip::ZipArchive::new(file).expect("read archive");
        (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect()
    }

    #[test]
    fn archive_excludes_history_subtree() -> Result<()> {
        let root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        fs::write(root.path().join("a.txt"), b"world")?;
        fs::create_dir_all(root.path().join(HISTORY_DIR).join("c2"))?;
        fs::write(root.path().join(HISTORY_DIR).join("c2").join("a.txt"), b"hello")?;

        let handle = export(root.path(), "demo.zip", scratch.path())?;
        let names = read_entry_names(handle.path());
        assert_eq!(names, ["a.txt"]);
        Ok(())
    }

    #[test]
    fn archive_contains_current_bytes() -> Result<()> {
        let root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("src"))?;
        fs::write(root.path().join("src/app.js"), b"console.log(1)")?;

        let handle = export(root.path(), "demo.zip", scratch.path())?;
        let file = File::open(handle.path())?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut entry = archive.by_name("src/app.js")?;
        let mut body = String::new();
        entry.read_to_string(&mut body)?;
        assert_eq!(body, "console.log(1)");
        Ok(())
    }

    #[test]
    fn dropping_the_handle_removes_the_transient_file() -> Result<()> {
        let root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        fs::write(root.path().join("x.txt"), b"x")?;

        let handle = export(root.path(), "demo.zip", scratch.path())?;
        let transient = handle.path().to_path_buf();
        assert!(transient.exists());
        drop(handle);
        assert!(!transient.exists(), "release must delete the archive");
        Ok(())
    }

    #[test]
    fn concurrent_exports_use_distinct_paths() -> Result<()> {
        let root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        fs::write(root.path().join("x.txt"), b"x")?;

        let first = export(root.path(), "demo.zip", scratch.path())?;
        let second = export(root.path(), "demo.zip", scratch.path())?;
        assert_ne!(first.path(), second.path());
        assert_eq!(first.filename(), second.filename());
        Ok(())
    }
}
