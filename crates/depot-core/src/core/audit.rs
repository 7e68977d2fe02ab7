//! Reconciliation between the catalog and the filesystem.
//!
//! The sweep only ever removes catalog rows that no longer correspond to
//! anything on disk; it never touches files and never recreates them. It is
//! cheap enough to trigger inline from read endpoints, gated by a persisted
//! cooldown so restarts do not reset the clock.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use depot_domain::timestamp_secs;

use crate::core::depot::Depot;

/// Minimum seconds between completed sweeps.
pub const AUDIT_COOLDOWN_SECS: i64 = 600;

const MARKER_FILENAME: &str = "last_audit";

/// Counters for one completed sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub projects_checked: usize,
    pub orphaned_projects_removed: usize,
    pub missing_tree_projects_removed: usize,
    pub stale_records_removed: usize,
    pub projects_skipped: usize,
}

/// Run the sweep if the cooldown has elapsed; otherwise a no-op. Safe to
/// call on every request.
pub fn run_if_due(depot: &Depot) -> Result<Option<AuditSummary>> {
    let marker = marker_path(depot);
    let now = timestamp_secs();
    if let Some(last) = read_marker(&marker) {
        if now - last < AUDIT_COOLDOWN_SECS {
            return Ok(None);
        }
    }
    let summary = sweep(depot)?;
    if let Err(err) = write_marker(&marker, now) {
        warn!(path = %marker.display(), %err, "failed to persist audit marker");
    }
    Ok(Some(summary))
}

/// `run_if_due` for call sites where an audit failure must not fail the
/// surrounding read.
pub(crate) fn run_if_due_logged(depot: &Depot) {
    if let Err(err) = run_if_due(depot) {
        warn!(%err, "consistency audit failed");
    }
}

/// Single pass over all projects, repairing catalog divergence from the
/// filesystem. Each project commits its repairs independently, so one bad
/// project never blocks the rest of the sweep.
pub fn sweep(depot: &Depot) -> Result<AuditSummary> {
    let mut summary = AuditSummary::default();
    let projects = depot.catalog().projects_all()?;
    for project in projects {
        summary.projects_checked += 1;
        let result = audit_project(depot, &mut summary, project.id, project.user_id, &project.name);
        if let Err(err) = result {
            summary.projects_skipped += 1;
            warn!(project_id = project.id, %err, "audit step failed, continuing sweep");
        }
    }
    info!(
        checked = summary.projects_checked,
        orphaned = summary.orphaned_projects_removed,
        missing_trees = summary.missing_tree_projects_removed,
        stale_records = summary.stale_records_removed,
        "consistency sweep completed"
    );
    Ok(summary)
}

fn audit_project(
    depot: &Depot,
    summary: &mut AuditSummary,
    project_id: i64,
    user_id: i64,
    name: &str,
) -> Result<()> {
    let owner = depot.catalog().user_by_id(user_id)?;
    let Some(owner) = owner else {
        debug!(project_id, name, "removing project with no owner");
        depot.catalog().delete_project_cascade(project_id)?;
        summary.orphaned_projects_removed += 1;
        return Ok(());
    };

    let project_root = depot.project_root(&owner.username, name);
    if !project_root.exists() {
        debug!(
            project_id,
            root = %project_root.display(),
            "removing project whose tree is gone"
        );
        depot.catalog().delete_project_cascade(project_id)?;
        summary.missing_tree_projects_removed += 1;
        return Ok(());
    }

    for record in depot.catalog().file_records_for_project(project_id)? {
        if Path::new(&record.storage_path).exists() {
            continue;
        }
        debug!(
            record_id = record.id,
            storage_path = %record.storage_path,
            "removing file record whose bytes are gone"
        );
        depot.catalog().delete_file_record(record.id)?;
        summary.stale_records_removed += 1;
    }
    Ok(())
}

fn marker_path(depot: &Depot) -> PathBuf {
    depot.scratch_dir().join(MARKER_FILENAME)
}

fn read_marker(path: &Path) -> Option<i64> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

fn write_marker(path: &Path, now: i64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, now.to_string())
        .with_context(|| format!("failed to write audit marker {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::push::{push_file, PushRequest};

    fn open_depot() -> (tempfile::TempDir, Depot) {
        let dir = tempfile::tempdir().expect("tempdir");
        let depot = Depot::open(Some(dir.path().to_path_buf())).expect("open depot");
        (dir, depot)
    }

    fn push(depot: &Depot, owner: &str, project: &str, path: &str, commit: &str, body: &[u8]) {
        push_file(
            depot,
            &PushRequest {
                owner: owner.to_string(),
                project: project.to_string(),
                commit_id: commit.to_string(),
                path: path.to_string(),
                declared_hash: String::new(),
                last_modified: 0,
                message: "m".to_string(),
                author: owner.to_string(),
                content: Some(body.to_vec()),
            },
        )
        .expect("push");
    }

    #[test]
    fn missing_file_prunes_only_its_record() -> Result<()> {
        let (_dir, depot) = open_depot();
        depot.catalog().create_user("alice", "a@example.com", "k1")?;
        push(&depot, "alice", "demo", "keep.txt", "c1", b"keep");
        push(&depot, "alice", "demo", "lost.txt", "c1", b"lost");

        fs::remove_file(depot.project_root("alice", "demo").join("lost.txt"))?;
        let summary = sweep(&depot)?;
        assert_eq!(summary.stale_records_removed, 1);

        let user = depot.catalog().user_by_name("alice")?.expect("user");
        let project = depot
            .catalog()
            .project_by_owner(user.id, "demo")?
            .expect("project survives");
        let records = depot.catalog().file_records_for_project(project.id)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "keep.txt");
        Ok(())
    }

    #[test]
    fn missing_tree_cascades_the_whole_project() -> Result<()> {
        let (_dir, depot) = open_depot();
        depot.catalog().create_user("alice", "a@example.com", "k1")?;
        depot.catalog().create_user("bob", "b@example.com", "k2")?;
        push(&depot, "alice", "doomed", "a.txt", "c1", b"a");
        push(&depot, "bob", "fine", "b.txt", "c2", b"b");

        fs::remove_dir_all(depot.project_root("alice", "doomed"))?;
        let summary = sweep(&depot)?;
        assert_eq!(summary.missing_tree_projects_removed, 1);

        let alice = depot.catalog().user_by_name("alice")?.expect("alice");
        assert!(depot.catalog().project_by_owner(alice.id, "doomed")?.is_none());

        let bob = depot.catalog().user_by_name("bob")?.expect("bob");
        let fine = depot
            .catalog()
            .project_by_owner(bob.id, "fine")?
            .expect("unrelated project untouched");
        assert_eq!(depot.catalog().file_records_for_project(fine.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn vanished_owner_orphans_the_project() -> Result<()> {
        let (_dir, depot) = open_depot();
        depot.catalog().create_user("ghost", "g@example.com", "k1")?;
        push(&depot, "ghost", "proj", "a.txt", "c1", b"a");

        depot.catalog().remove_user("ghost")?;
        let summary = sweep(&depot)?;
        assert_eq!(summary.orphaned_projects_removed, 1);
        assert!(depot.catalog().projects_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn sweep_never_touches_the_filesystem() -> Result<()> {
        let (_dir, depot) = open_depot();
        depot.catalog().create_user("alice", "a@example.com", "k1")?;
        push(&depot, "alice", "demo", "a.txt", "c1", b"a");

        sweep(&depot)?;
        assert!(depot.project_root("alice", "demo").join("a.txt").exists());
        Ok(())
    }

    #[test]
    fn cooldown_gates_repeat_runs() -> Result<()> {
        let (_dir, depot) = open_depot();
        assert!(run_if_due(&depot)?.is_some(), "first call sweeps");
        assert!(run_if_due(&depot)?.is_none(), "second call is inside cooldown");

        // Age the marker past the cooldown and confirm the sweep resumes.
        let marker = marker_path(&depot);
        fs::write(&marker, (timestamp_secs() - AUDIT_COOLDOWN_SECS - 1).to_string())?;
        assert!(run_if_due(&depot)?.is_some());
        Ok(())
    }
}
