//! One file-push operation: validate, persist bytes, record the push.

use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use depot_domain::{validate_identifier, DELETED_HASH, MARKER_DIR};

use crate::core::catalog::NewFileRecord;
use crate::core::content;
use crate::core::depot::Depot;
use crate::error::{storage_io_error, DepotError};

/// Everything one push carries. `content: None` marks a deletion; the
/// declared hash is then replaced by the deletion sentinel. For uploads the
/// hash stored is recomputed server-side from the bytes actually received,
/// so the record always describes what is on disk even when the file changed
/// between the client's commit and its push.
#[derive(Clone, Debug)]
pub struct PushRequest {
    pub owner: String,
    pub project: String,
    pub commit_id: String,
    pub path: String,
    pub declared_hash: String,
    pub last_modified: i64,
    pub message: String,
    pub author: String,
    pub content: Option<Vec<u8>>,
}

/// What the caller gets back after a successful push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileRecordSummary {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub commit_id: String,
}

/// Accept one file push. The owning project and commit are created lazily on
/// first reference; the content store write happens before the catalog
/// transaction, and a catalog failure after bytes landed leaves them as
/// garbage for the audit sweep rather than attempting a filesystem rollback.
pub fn push_file(depot: &Depot, request: &PushRequest) -> Result<FileRecordSummary> {
    validate(request)?;

    let user = depot
        .catalog()
        .user_by_name(&request.owner)?
        .ok_or_else(|| DepotError::NotFound(format!("owner {}", request.owner)))?;

    let project_root = depot.project_root(&request.owner, &request.project);
    let (stored, hash) = match &request.content {
        Some(bytes) => {
            let computed = hex::encode(Sha256::digest(bytes));
            let stored = content::put(&project_root, &request.path, bytes, &request.commit_id)?;
            (stored, computed)
        }
        None => {
            let stored = content::delete(&project_root, &request.path, &request.commit_id)?;
            (stored, DELETED_HASH.to_string())
        }
    };
    ensure_marker(&project_root)?;

    let project = depot.catalog().ensure_project(user.id, &request.project)?;
    depot.catalog().ensure_commit(
        &request.commit_id,
        project.id,
        &request.message,
        &request.author,
    )?;
    depot.catalog().record_push(
        project.id,
        &NewFileRecord {
            commit_id: request.commit_id.clone(),
            path: request.path.clone(),
            hash: hash.clone(),
            last_modified: request.last_modified,
            storage_path: stored.path.to_string_lossy().into_owned(),
            size: stored.size,
        },
    )?;

    debug!(
        owner = %request.owner,
        project = %request.project,
        path = %request.path,
        commit_id = %request.commit_id,
        size = stored.size,
        "push recorded"
    );
    Ok(FileRecordSummary {
        path: request.path.clone(),
        hash,
        size: stored.size,
        commit_id: request.commit_id.clone(),
    })
}

fn validate(request: &PushRequest) -> Result<()> {
    validate_identifier("owner", &request.owner)
        .map_err(|err| DepotError::Validation(err.to_string()))?;
    validate_identifier("project", &request.project)
        .map_err(|err| DepotError::Validation(err.to_string()))?;
    if request.commit_id.trim().is_empty() {
        return Err(DepotError::Validation("commit id must not be empty".to_string()).into());
    }
    if request.path.trim().is_empty() {
        return Err(DepotError::Validation("file path must not be empty".to_string()).into());
    }
    Ok(())
}

fn ensure_marker(project_root: &std::path::Path) -> Result<()> {
    let marker = project_root.join(MARKER_DIR);
    fs::create_dir_all(&marker)
        .with_context(|| format!("failed to create marker directory {}", marker.display()))
        .map_err(storage_io_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_depot() -> (tempfile::TempDir, Depot) {
        let dir = tempfile::tempdir().expect("tempdir");
        let depot = Depot::open(Some(dir.path().to_path_buf())).expect("open depot");
        depot
            .catalog()
            .create_user("alice", "alice@example.com", "key-a")
            .expect("create user");
        (dir, depot)
    }

    fn request(path: &str, commit: &str, content: Option<&[u8]>) -> PushRequest {
        PushRequest {
            owner: "alice".to_string(),
            project: "demo".to_string(),
            commit_id: commit.to_string(),
            path: path.to_string(),
            declared_hash: "feedbead".to_string(),
            last_modified: 1_700_000_000,
            message: "test commit".to_string(),
            author: "alice".to_string(),
            content: content.map(<[u8]>::to_vec),
        }
    }

    #[test]
    fn stored_hash_is_computed_from_received_bytes() -> Result<()> {
        let (_dir, depot) = open_depot();
        let summary = push_file(&depot, &request("a.txt", "c1", Some(b"hello")))?;
        assert_eq!(summary.hash, hex::encode(Sha256::digest(b"hello")));
        assert_ne!(summary.hash, "feedbead", "declared hash must not be trusted");
        Ok(())
    }

    #[test]
    fn two_paths_under_one_new_commit_share_a_commit_row() -> Result<()> {
        let (_dir, depot) = open_depot();
        push_file(&depot, &request("a.txt", "c1", Some(b"one")))?;
        push_file(&depot, &request("b.txt", "c1", Some(b"two")))?;

        let user = depot.catalog().user_by_name("alice")?.expect("user");
        let project = depot
            .catalog()
            .project_by_owner(user.id, "demo")?
            .expect("project");
        assert_eq!(depot.catalog().commits_for_project(project.id)?.len(), 1);
        assert_eq!(depot.catalog().file_records_for_project(project.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn repush_appends_a_record_instead_of_rewriting() -> Result<()> {
        let (_dir, depot) = open_depot();
        push_file(&depot, &request("a.txt", "c1", Some(b"hello")))?;
        push_file(&depot, &request("a.txt", "c2", Some(b"world")))?;

        let user = depot.catalog().user_by_name("alice")?.expect("user");
        let project = depot
            .catalog()
            .project_by_owner(user.id, "demo")?
            .expect("project");
        let records = depot.catalog().file_records_for_project(project.id)?;
        assert_eq!(records.len(), 2, "every push appends a new record");
        Ok(())
    }

    #[test]
    fn deletion_push_records_the_sentinel() -> Result<()> {
        let (_dir, depot) = open_depot();
        push_file(&depot, &request("a.txt", "c1", Some(b"hello")))?;
        let summary = push_file(&depot, &request("a.txt", "c2", None))?;

        assert_eq!(summary.hash, DELETED_HASH);
        assert_eq!(summary.size, 0);
        assert!(!depot.project_root("alice", "demo").join("a.txt").exists());
        Ok(())
    }

    #[test]
    fn traversal_leaves_catalog_untouched() -> Result<()> {
        let (_dir, depot) = open_depot();
        let err = push_file(&depot, &request("../../etc/passwd", "c1", Some(b"x"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::AccessDenied(_))
        ));

        let user = depot.catalog().user_by_name("alice")?.expect("user");
        assert!(depot.catalog().project_by_owner(user.id, "demo")?.is_none());
        assert!(
            !depot.project_root("alice", "demo").exists(),
            "rejected push must not create the project tree"
        );
        Ok(())
    }

    #[test]
    fn missing_fields_fail_validation() {
        let (_dir, depot) = open_depot();
        let mut bad = request("a.txt", "", Some(b"x"));
        bad.commit_id = String::new();
        let err = push_file(&depot, &bad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::Validation(_))
        ));
    }

    #[test]
    fn unknown_owner_is_not_found() {
        let (_dir, depot) = open_depot();
        let mut req = request("a.txt", "c1", Some(b"x"));
        req.owner = "nobody".to_string();
        let err = push_file(&depot, &req).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DepotError>(),
            Some(DepotError::NotFound(_))
        ));
    }
}
