//! Time-bounded on-disk cache of precomputed read-heavy responses, keyed by
//! endpoint name. Entries are invalidated purely by age; writes never
//! invalidate them, so staleness up to the bound is expected.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub struct ScratchCache {
    dir: PathBuf,
    max_age: Duration,
}

impl ScratchCache {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    #[must_use]
    pub fn with_max_age(dir: PathBuf, max_age: Duration) -> Self {
        Self { dir, max_age }
    }

    /// Return the cached response for an endpoint if one exists and is still
    /// inside the age bound. Unreadable or corrupt entries read as misses.
    pub fn load(&self, endpoint: &str) -> Option<Value> {
        let path = self.entry_path(endpoint);
        let meta = fs::metadata(&path).ok()?;
        let modified = meta.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age >= self.max_age {
            debug!(endpoint, "scratch cache entry expired");
            return None;
        }
        let contents = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Persist a response for an endpoint, pruning any expired siblings on
    /// the way.
    pub fn store(&self, endpoint: &str, value: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        self.prune_expired();
        let path = self.entry_path(endpoint);
        let body = serde_json::to_string(value).context("failed to encode cache entry")?;
        fs::write(&path, body)
            .with_context(|| format!("failed to write cache entry {}", path.display()))?;
        Ok(())
    }

    fn entry_path(&self, endpoint: &str) -> PathBuf {
        // Endpoint names are internal identifiers; normalize anything
        // path-hostile just in case.
        let safe: String = endpoint
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn prune_expired(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let now = SystemTime::now();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() >= self.max_age {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_within_the_age_bound() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = ScratchCache::new(dir.path().to_path_buf());
        cache.store("repo/alice/demo", &json!({"files": 3}))?;
        assert_eq!(cache.load("repo/alice/demo"), Some(json!({"files": 3})));
        Ok(())
    }

    #[test]
    fn zero_age_bound_expires_immediately() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = ScratchCache::with_max_age(dir.path().to_path_buf(), Duration::ZERO);
        cache.store("languages", &json!({"Rust": 100.0}))?;
        assert_eq!(cache.load("languages"), None);
        Ok(())
    }

    #[test]
    fn unknown_endpoint_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ScratchCache::new(dir.path().to_path_buf());
        assert_eq!(cache.load("never-stored"), None);
    }
}
