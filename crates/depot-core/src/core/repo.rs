//! Read-side and administrative operations over projects: repository views,
//! file fetch, commit listings, stars, forks, deploys, deletion.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::Serialize;
use tracing::{debug, warn};

use depot_domain::{format_rfc3339, resolve_under_root, validate_identifier};

use crate::core::audit;
use crate::core::catalog::{Project, StarState, User};
use crate::core::depot::Depot;
use crate::core::tree::{self, TreeEntry};
use crate::error::{storage_io_error, DepotError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub id: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RepositoryView {
    pub owner: String,
    pub project: String,
    pub created_at: String,
    pub last_updated: String,
    pub latest_commit: Option<CommitSummary>,
    pub files: Vec<TreeEntry>,
    pub readme: Option<String>,
    pub stars: i64,
    pub is_starred: bool,
    pub is_deployed: bool,
    pub deploy_source_path: Option<String>,
}

/// Fetched file body: decoded text when the bytes are UTF-8, base64
/// otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "encoding", content = "content", rename_all = "lowercase")]
pub enum FileContent {
    Text(String),
    Base64(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub owner: String,
    pub project: String,
    pub created_at: String,
    pub last_updated: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub created_at: String,
    pub last_updated: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub username: String,
    pub joined_at: String,
    pub projects: Vec<ProjectSummary>,
}

/// Look up owner and project rows, mapping absences onto `NotFound`.
pub(crate) fn resolve_project(depot: &Depot, owner: &str, project: &str) -> Result<(User, Project)> {
    let user = depot
        .catalog()
        .user_by_name(owner)?
        .ok_or_else(|| DepotError::NotFound(format!("owner {owner}")))?;
    let row = depot
        .catalog()
        .project_by_owner(user.id, project)?
        .ok_or_else(|| DepotError::NotFound(format!("project {owner}/{project}")))?;
    Ok((user, row))
}

/// The repository page payload: current files, readme, newest commit, star
/// and deploy state. `viewer` marks whether that account has starred it.
pub fn get_repository(
    depot: &Depot,
    owner: &str,
    project: &str,
    viewer: Option<&str>,
) -> Result<RepositoryView> {
    audit::run_if_due_logged(depot);
    let (_user, row) = resolve_project(depot, owner, project)?;
    let project_root = depot.project_root(owner, project);
    if !project_root.exists() {
        return Err(DepotError::NotFound(format!("files for {owner}/{project}")).into());
    }

    let files = tree::list_current_files(&project_root)?;
    let readme = tree::find_readme(&project_root);
    let latest = depot
        .catalog()
        .latest_commit(row.id)?
        .map(|commit| commit_summary(&commit));

    let details = depot.catalog().repo_details(row.id)?.unwrap_or_default();
    let is_starred = match viewer {
        Some(name) => match depot.catalog().user_by_name(name)? {
            Some(viewer_row) => depot.catalog().star_exists(viewer_row.id, row.id)?,
            None => false,
        },
        None => false,
    };

    Ok(RepositoryView {
        owner: owner.to_string(),
        project: project.to_string(),
        created_at: format_rfc3339(row.created_at),
        last_updated: format_rfc3339(row.last_updated),
        latest_commit: latest,
        files,
        readme,
        stars: details.stars,
        is_starred,
        is_deployed: details.is_deployed,
        deploy_source_path: details.deploy_source_path,
    })
}

/// Fetch one file from the current tree, traversal-checked against the
/// project root.
pub fn get_file(depot: &Depot, owner: &str, project: &str, path: &str) -> Result<FileContent> {
    resolve_project(depot, owner, project)?;
    let project_root = depot.project_root(owner, project);
    let full = resolve_under_root(&project_root, path).ok_or_else(|| {
        DepotError::AccessDenied(format!("path {path} escapes the project root"))
    })?;
    if !full.is_file() {
        return Err(DepotError::NotFound(format!("file {path}")).into());
    }
    let bytes =
        fs::read(&full).with_context(|| format!("failed to read {}", full.display()))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(FileContent::Text(text)),
        Err(err) => Ok(FileContent::Base64(
            BASE64_STANDARD.encode(err.into_bytes()),
        )),
    }
}

/// Newest commit of a project, if it has any.
pub fn latest_commit(depot: &Depot, owner: &str, project: &str) -> Result<Option<CommitSummary>> {
    let (_user, row) = resolve_project(depot, owner, project)?;
    Ok(depot
        .catalog()
        .latest_commit(row.id)?
        .map(|commit| commit_summary(&commit)))
}

/// All commits of a project, newest first.
pub fn list_commits(depot: &Depot, owner: &str, project: &str) -> Result<Vec<CommitSummary>> {
    audit::run_if_due_logged(depot);
    let (_user, row) = resolve_project(depot, owner, project)?;
    let commits = depot.catalog().commits_for_project(row.id)?;
    Ok(commits.iter().map(commit_summary).collect())
}

/// Byte-weighted language percentages over the project's current tree.
pub fn language_stats(
    depot: &Depot,
    owner: &str,
    project: &str,
) -> Result<std::collections::BTreeMap<String, f64>> {
    resolve_project(depot, owner, project)?;
    let project_root = depot.project_root(owner, project);
    if !project_root.exists() {
        return Err(DepotError::NotFound(format!("files for {owner}/{project}")).into());
    }
    tree::language_breakdown(&project_root)
}

/// Toggle the viewer's star on a project.
pub fn star_project(
    depot: &Depot,
    viewer: &str,
    owner: &str,
    project: &str,
) -> Result<StarState> {
    let viewer_row = depot
        .catalog()
        .user_by_name(viewer)?
        .ok_or_else(|| DepotError::NotFound(format!("user {viewer}")))?;
    let (_user, row) = resolve_project(depot, owner, project)?;
    depot.catalog().toggle_star(viewer_row.id, row.id)
}

/// Copy a project (tree and all, history included) under the viewer as
/// `<name>-fork`. Forking twice into the same name is a conflict.
pub fn fork_project(depot: &Depot, viewer: &str, owner: &str, project: &str) -> Result<String> {
    let viewer_row = depot
        .catalog()
        .user_by_name(viewer)?
        .ok_or_else(|| DepotError::NotFound(format!("user {viewer}")))?;
    let (_user, _row) = resolve_project(depot, owner, project)?;

    let fork_name = format!("{project}-fork");
    validate_identifier("project", &fork_name)
        .map_err(|err| DepotError::Validation(err.to_string()))?;
    if depot
        .catalog()
        .project_by_owner(viewer_row.id, &fork_name)?
        .is_some()
    {
        return Err(DepotError::Conflict(format!(
            "{viewer} has already forked {owner}/{project}"
        ))
        .into());
    }

    let source_root = depot.project_root(owner, project);
    if !source_root.exists() {
        return Err(DepotError::NotFound(format!("files for {owner}/{project}")).into());
    }
    let fork_root = depot.project_root(viewer, &fork_name);
    copy_tree(&source_root, &fork_root).map_err(storage_io_error)?;
    depot.catalog().ensure_project(viewer_row.id, &fork_name)?;
    debug!(viewer, owner, project, fork_name, "project forked");
    Ok(fork_name)
}

/// Remove a project: its tree, then every catalog row that hangs off it.
/// Owner-only.
pub fn delete_project(depot: &Depot, caller: &str, owner: &str, project: &str) -> Result<()> {
    if caller != owner {
        return Err(DepotError::AccessDenied(
            "only the project owner can delete the repository".to_string(),
        )
        .into());
    }
    let (_user, row) = resolve_project(depot, owner, project)?;

    let project_root = depot.project_root(owner, project);
    if project_root.exists() {
        fs::remove_dir_all(&project_root)
            .with_context(|| format!("failed to remove {}", project_root.display()))
            .map_err(storage_io_error)?;
    }
    depot.catalog().delete_project_cascade(row.id)?;
    debug!(owner, project, "project deleted");
    Ok(())
}

/// Mark a project as deployed from `source_path` (relative to the project
/// root, which must exist). Owner-only.
pub fn deploy_project(
    depot: &Depot,
    caller: &str,
    owner: &str,
    project: &str,
    source_path: &str,
) -> Result<()> {
    if caller != owner {
        return Err(DepotError::AccessDenied(
            "only the project owner can deploy".to_string(),
        )
        .into());
    }
    let (_user, row) = resolve_project(depot, owner, project)?;
    let project_root = depot.project_root(owner, project);
    let full = resolve_under_root(&project_root, source_path).ok_or_else(|| {
        DepotError::AccessDenied(format!("path {source_path} escapes the project root"))
    })?;
    if !full.is_file() {
        return Err(DepotError::Validation(format!(
            "source file {source_path} does not exist"
        ))
        .into());
    }
    depot.catalog().set_deploy(row.id, Some(source_path))?;
    Ok(())
}

/// Clear a project's deployed flag. Owner-only.
pub fn undeploy_project(depot: &Depot, caller: &str, owner: &str, project: &str) -> Result<()> {
    if caller != owner {
        return Err(DepotError::AccessDenied(
            "only the project owner can undeploy".to_string(),
        )
        .into());
    }
    let (_user, row) = resolve_project(depot, owner, project)?;
    depot.catalog().set_deploy(row.id, None)?;
    Ok(())
}

/// Case-insensitive substring search over project names.
pub fn search_projects(depot: &Depot, query: &str) -> Result<Vec<SearchHit>> {
    let hits = depot.catalog().search_projects(query)?;
    Ok(hits
        .into_iter()
        .map(|(project, owner)| SearchHit {
            owner,
            project: project.name,
            created_at: format_rfc3339(project.created_at),
            last_updated: format_rfc3339(project.last_updated),
        })
        .collect())
}

/// A user's public profile: join date plus their projects.
pub fn get_profile(depot: &Depot, username: &str) -> Result<ProfileView> {
    let user = depot
        .catalog()
        .user_by_name(username)?
        .ok_or_else(|| DepotError::NotFound(format!("user {username}")))?;
    let projects = depot
        .catalog()
        .projects_for_user(user.id)?
        .into_iter()
        .map(|project| ProjectSummary {
            name: project.name,
            created_at: format_rfc3339(project.created_at),
            last_updated: format_rfc3339(project.last_updated),
        })
        .collect();
    Ok(ProfileView {
        username: user.username,
        joined_at: format_rfc3339(user.created_at),
        projects,
    })
}

fn commit_summary(commit: &crate::core::catalog::CommitRow) -> CommitSummary {
    CommitSummary {
        id: commit.commit_id.clone(),
        message: commit.message.clone(),
        author: commit.author.clone(),
        date: format_rfc3339(commit.created_at),
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, source = %source.display(), "skipping path during fork copy");
                continue;
            }
        };
        let rel = entry
            .path()
            .strip_prefix(source)
            .context("failed to relativize path during fork copy")?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::push::{push_file, PushRequest};

    fn open_depot() -> (tempfile::TempDir, Depot) {
        let dir = tempfile::tempdir().expect("tempdir");
        let depot = Depot::open(Some(dir.path().to_path_buf())).expect("open depot");
        depot
            .catalog()
            .create_user("alice", "alice@example.com", "k1")
            .expect("alice");
        depot
            .catalog()
            .create_user("bob", "bob@example.com", "k2")
            .expect("bob");
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
                message: format!("commit {commit}"),
                author: owner.to_string(),
                content: Some(body.to_vec()),
            },
        )
        .expect("push");
    }

    #[test]
    fn binary_files_come_back_base64() -> Result<()> {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "demo", "blob.bin", "c1", &[0u8, 159, 146, 150]);
        match get_file(&depot, "alice", "demo", "blob.bin")? {
            FileContent::Base64(encoded) => {
                assert_eq!(BASE64_STANDARD.decode(encoded)?, vec![0u8, 159, 146, 150]);
            }
            FileContent::Text(_) => panic!("expected base64 content"),
        }
        Ok(())
    }

    #[test]
    fn file_fetch_refuses_traversal() {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "demo", "a.txt", "c1", b"x");
        let err = get_file(&depot, "alice", "demo", "../../../etc/passwd").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::AccessDenied(_))
        ));
    }

    #[test]
    fn star_toggles_on_and_off() -> Result<()> {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "demo", "a.txt", "c1", b"x");

        let on = star_project(&depot, "bob", "alice", "demo")?;
        assert!(on.starred);
        assert_eq!(on.total_stars, 1);

        let off = star_project(&depot, "bob", "alice", "demo")?;
        assert!(!off.starred);
        assert_eq!(off.total_stars, 0);
        Ok(())
    }

    #[test]
    fn fork_copies_the_tree_and_conflicts_on_repeat() -> Result<()> {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "demo", "src/app.py", "c1", b"print(1)");

        let fork_name = fork_project(&depot, "bob", "alice", "demo")?;
        assert_eq!(fork_name, "demo-fork");
        assert!(depot
            .project_root("bob", "demo-fork")
            .join("src/app.py")
            .exists());

        let err = fork_project(&depot, "bob", "alice", "demo").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::Conflict(_))
        ));
        Ok(())
    }

    #[test]
    fn delete_is_owner_only_and_cascades() -> Result<()> {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "demo", "a.txt", "c1", b"x");

        let err = delete_project(&depot, "bob", "alice", "demo").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::AccessDenied(_))
        ));

        delete_project(&depot, "alice", "alice", "demo")?;
        assert!(!depot.project_root("alice", "demo").exists());
        let err = get_repository(&depot, "alice", "demo", None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn deploy_requires_an_existing_source() -> Result<()> {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "site", "index.html", "c1", b"<html/>");

        let err = deploy_project(&depot, "alice", "alice", "site", "missing.html").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::Validation(_))
        ));

        deploy_project(&depot, "alice", "alice", "site", "index.html")?;
        let view = get_repository(&depot, "alice", "site", None)?;
        assert!(view.is_deployed);
        assert_eq!(view.deploy_source_path.as_deref(), Some("index.html"));

        undeploy_project(&depot, "alice", "alice", "site")?;
        let view = get_repository(&depot, "alice", "site", None)?;
        assert!(!view.is_deployed);
        Ok(())
    }

    #[test]
    fn search_and_profile_surface_projects() -> Result<()> {
        let (_dir, depot) = open_depot();
        push(&depot, "alice", "web-app", "a.txt", "c1", b"x");
        push(&depot, "alice", "tooling", "b.txt", "c2", b"y");

        let hits = search_projects(&depot, "WEB")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].project, "web-app");

        let profile = get_profile(&depot, "alice")?;
        assert_eq!(profile.projects.len(), 2);
        Ok(())
    }
}
