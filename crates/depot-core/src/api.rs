// Intended public API surface for `depot-core`.
//
// This module exists to keep the crate root small and make it explicit which
// types/functions are part of the stable interface used by the CLI and the
// HTTP layer.

pub use crate::core::audit::{run_if_due, sweep, AuditSummary, AUDIT_COOLDOWN_SECS};
pub use crate::core::catalog::{
    Catalog, CommitRow, FileRecordRow, NewFileRecord, Project, RepoDetailsRow, StarState, User,
};
pub use crate::core::content::StoredFile;
pub use crate::core::depot::Depot;
pub use crate::core::export::{export, pull_archive, ArchiveHandle};
pub use crate::core::push::{push_file, FileRecordSummary, PushRequest};
pub use crate::core::repo::{
    delete_project, deploy_project, fork_project, get_file, get_profile, get_repository,
    language_stats, latest_commit, list_commits, search_projects, star_project,
    undeploy_project, CommitSummary, FileContent, ProfileView, ProjectSummary, RepositoryView,
    SearchHit,
};
pub use crate::core::scratch::ScratchCache;
pub use crate::core::tree::{filtered_walk, find_readme, list_current_files, TreeEntry};
pub use crate::error::DepotError;
