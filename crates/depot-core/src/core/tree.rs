//! Walks over a project's current tree, skipping the history and marker
//! subtrees. Every consumer of the tree (listing, export, statistics) goes
//! through the same filtered walk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use depot_domain::{
    is_reserved_dir, language_for_extension, language_percentages, normalize_entry_path,
    README_CANDIDATES,
};

/// One file in the current tree, path relative to the project root with
/// forward slashes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub size: u64,
}

/// Recursive walk of `root` with the reserved subtrees pruned entirely, so a
/// large history never gets descended into.
pub fn filtered_walk(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .sort_by(|a, b| a.path().cmp(b.path()))
        .into_iter()
        .filter_entry(|entry| !is_reserved_dir(entry.file_name()))
}

/// List the files that exist in the current tree right now, independent of
/// what the catalog's file records say.
pub fn list_current_files(root: &Path) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for entry in filtered_walk(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, root = %root.display(), "skipping path during tree walk");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = normalize_entry_path(root, entry.path()) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        entries.push(TreeEntry { path, size });
    }
    Ok(entries)
}

/// Probe the fixed README candidates at the project root (non-recursive) and
/// return the first readable match.
pub fn find_readme(root: &Path) -> Option<String> {
    for candidate in README_CANDIDATES {
        let path = root.join(candidate);
        if path.is_file() {
            match fs::read_to_string(&path) {
                Ok(content) => return Some(content),
                Err(err) => {
                    debug!(path = %path.display(), %err, "failed to read readme candidate");
                }
            }
        }
    }
    None
}

/// Byte-weighted language percentages over the current tree.
pub fn language_breakdown(root: &Path) -> Result<BTreeMap<String, f64>> {
    let mut sizes: BTreeMap<String, u64> = BTreeMap::new();
    for entry in filtered_walk(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, root = %root.display(), "skipping path during language scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let Some(language) = language_for_extension(ext) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        *sizes.entry(language.to_string()).or_default() += size;
    }
    Ok(language_percentages(&sizes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_domain::{HISTORY_DIR, MARKER_DIR};

    fn seed_tree(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.py"), b"print('hi')").unwrap();
        fs::write(root.join("README.md"), b"# demo").unwrap();
        fs::create_dir_all(root.join(HISTORY_DIR).join("c9").join("src")).unwrap();
        fs::write(
            root.join(HISTORY_DIR).join("c9").join("src").join("main.py"),
            b"old",
        )
        .unwrap();
        fs::create_dir_all(root.join(MARKER_DIR)).unwrap();
        fs::write(root.join(MARKER_DIR).join("state"), b"1").unwrap();
    }

    #[test]
    fn listing_skips_reserved_subtrees() -> Result<()> {
        let dir = tempfile::tempdir()?;
        seed_tree(dir.path());

        let entries = list_current_files(dir.path())?;
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["README.md", "src/main.py"]);
        assert!(entries.iter().all(|e| !e.path.starts_with(".history")));
        Ok(())
    }

    #[test]
    fn readme_lookup_is_root_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("docs"))?;
        fs::write(dir.path().join("docs/README.md"), b"nested")?;
        assert_eq!(find_readme(dir.path()), None);

        fs::write(dir.path().join("readme.md"), b"lowercase wins")?;
        assert_eq!(find_readme(dir.path()).as_deref(), Some("lowercase wins"));
        Ok(())
    }

    #[test]
    fn language_scan_ignores_history_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        seed_tree(dir.path());
        // History holds a large Go file that must not count.
        fs::write(
            dir.path().join(HISTORY_DIR).join("c9").join("huge.go"),
            vec![b'x'; 4096],
        )?;

        let breakdown = language_breakdown(dir.path())?;
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown["Python"], 100.0);
        Ok(())
    }
}
