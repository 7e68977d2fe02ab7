//! Path rules for project trees: reserved directories, identifier checks, and
//! sandboxed resolution of client-supplied relative paths.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};

/// Reserved subdirectory holding pre-overwrite snapshots, keyed by commit id.
pub const HISTORY_DIR: &str = ".history";

/// Marker directory signaling that a project tree is under version control.
pub const MARKER_DIR: &str = ".depot";

/// Sentinel hash recorded for deletion pushes.
pub const DELETED_HASH: &str = "DELETED";

/// True for directory names that must be skipped by every tree walk.
pub fn is_reserved_dir(name: &OsStr) -> bool {
    name == OsStr::new(HISTORY_DIR) || name == OsStr::new(MARKER_DIR)
}

/// Validate an owner or project name used as a single path component under the
/// storage root.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{kind} must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(anyhow!("{kind} must not be a dot path (got {value})"));
    }
    if value.chars().any(|c| matches!(c, '/' | '\\') || c == '\0') {
        return Err(anyhow!("{kind} must not contain path separators (got {value})"));
    }
    Ok(())
}

/// Resolve a client-supplied relative path against a project root, refusing
/// any resolution that would escape the root.
///
/// The check is lexical so it also covers targets that do not exist yet: the
/// path is normalized component by component, and a `..` that would climb
/// above the root yields `None`. Absolute paths and paths with prefixes are
/// refused outright.
pub fn resolve_under_root(root: &Path, relative: &str) -> Option<PathBuf> {
    if relative.is_empty() {
        return None;
    }
    let mut depth: usize = 0;
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if depth == 0 {
        return None;
    }
    Some(resolved)
}

/// Render a path relative to a root with forward slashes, the form used for
/// tree listings and archive entry names.
pub fn normalize_entry_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| anyhow!("path {} is outside {}", path.display(), root.display()))?;
    let normalized = rel.to_string_lossy().replace('\\', "/");
    if normalized.is_empty() {
        return Err(anyhow!("entry path is empty"));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_relative_paths() {
        let root = Path::new("/srv/files/alice/demo");
        assert_eq!(
            resolve_under_root(root, "src/main.rs"),
            Some(root.join("src/main.rs"))
        );
    }

    #[test]
    fn normalizes_inner_parent_components() {
        let root = Path::new("/srv/files/alice/demo");
        assert_eq!(
            resolve_under_root(root, "src/../README.md"),
            Some(root.join("README.md"))
        );
    }

    #[test]
    fn refuses_escapes_and_absolutes() {
        let root = Path::new("/srv/files/alice/demo");
        assert_eq!(resolve_under_root(root, "../../etc/passwd"), None);
        assert_eq!(resolve_under_root(root, "src/../../other"), None);
        assert_eq!(resolve_under_root(root, "/etc/passwd"), None);
        assert_eq!(resolve_under_root(root, ""), None);
        assert_eq!(resolve_under_root(root, "."), None);
    }

    #[test]
    fn identifier_rules_reject_separators() {
        assert!(validate_identifier("project", "demo").is_ok());
        assert!(validate_identifier("project", "a/b").is_err());
        assert!(validate_identifier("owner", "..").is_err());
        assert!(validate_identifier("owner", "").is_err());
    }
}
