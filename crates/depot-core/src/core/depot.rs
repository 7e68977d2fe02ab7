use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::catalog::Catalog;

const FILES_DIR: &str = "files";
const TMP_DIR: &str = "tmp";
const CACHE_DIR: &str = "cache";

/// Handle to one storage root: the on-disk project trees plus the metadata
/// catalog that indexes them. Every operation takes a `&Depot` explicitly;
/// there is no process-wide current store.
#[derive(Debug)]
pub struct Depot {
    root: PathBuf,
    catalog: Catalog,
}

impl Depot {
    /// Open (creating if needed) the storage root, or the default resolved
    /// from `DEPOT_STORAGE_PATH` / `./storage` when `None` is supplied.
    pub fn open(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(path) => path,
            None => default_root(),
        };
        for dir in [FILES_DIR, TMP_DIR, CACHE_DIR] {
            fs::create_dir_all(root.join(dir)).with_context(|| {
                format!("failed to ensure storage directory {}", root.join(dir).display())
            })?;
        }
        let catalog = Catalog::open(root.join(Catalog::FILENAME))?;
        Ok(Self { root, catalog })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Root directory for all project trees.
    #[must_use]
    pub fn files_root(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    /// On-disk root of one project's tree, derived from `(owner, name)`.
    #[must_use]
    pub fn project_root(&self, owner: &str, project: &str) -> PathBuf {
        self.files_root().join(owner).join(project)
    }

    /// Scratch directory for transient archives and the audit marker.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Directory backing the time-bounded response cache.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }
}

fn default_root() -> PathBuf {
    if let Some(path) = env::var_os("DEPOT_STORAGE_PATH") {
        return PathBuf::from(path);
    }
    PathBuf::from("storage")
}
