use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;

mod commits;
mod details;
mod projects;
mod users;

pub use commits::NewFileRecord;

const SCHEMA_VERSION: u32 = 1;
const META_KEY_SCHEMA_VERSION: &str = "schema_version";

/// Relational record of users, projects, commits, and file pushes. The
/// catalog never owns file bytes; it indexes what the content store wrote and
/// is repaired against the filesystem by the audit sweep.
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
}

/// Account row. Accounts are created and removed by an external auth layer;
/// the engine reads them for ownership checks and the audit sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub api_key: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub created_at: i64,
    pub last_updated: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRow {
    pub id: i64,
    pub commit_id: String,
    pub project_id: i64,
    pub message: String,
    pub author: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecordRow {
    pub id: i64,
    pub commit_id: String,
    pub path: String,
    pub hash: String,
    pub last_modified: i64,
    pub storage_path: String,
    pub size: u64,
    pub created_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoDetailsRow {
    pub stars: i64,
    pub is_deployed: bool,
    pub deploy_source_path: Option<String>,
    pub download_count: i64,
    pub visits: i64,
}

/// Result of a star toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StarState {
    pub starred: bool,
    pub total_stars: i64,
}

impl Catalog {
    pub const FILENAME: &'static str = "catalog.sqlite";

    /// Open the catalog at `path`, creating the schema on first use.
    pub fn open(path: PathBuf) -> Result<Self> {
        let catalog = Self { path };
        let conn = catalog.connection()?;
        catalog.init_schema(&conn)?;
        catalog.ensure_meta(&conn)?;
        Ok(catalog)
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open catalog at {}", self.path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL for catalog")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys for catalog")?;
        conn.busy_timeout(Duration::from_secs(10))
            .context("failed to set busy timeout for catalog")?;
        Ok(conn)
    }

    pub(crate) fn with_immediate_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start catalog transaction")?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn init_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                api_key TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );
            -- user_id intentionally carries no FOREIGN KEY: accounts live in
            -- an external layer and may vanish underneath us; the audit sweep
            -- repairs projects whose owner row is gone.
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_updated INTEGER NOT NULL,
                UNIQUE(user_id, name)
            );
            CREATE TABLE IF NOT EXISTS commits (
                id INTEGER PRIMARY KEY,
                commit_id TEXT NOT NULL UNIQUE,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                message TEXT NOT NULL,
                author TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS file_records (
                id INTEGER PRIMARY KEY,
                commit_id TEXT NOT NULL REFERENCES commits(commit_id),
                path TEXT NOT NULL,
                hash TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                storage_path TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_file_records_commit
                ON file_records(commit_id);
            CREATE INDEX IF NOT EXISTS idx_file_records_hash
                ON file_records(hash);
            CREATE TABLE IF NOT EXISTS repo_details (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL UNIQUE REFERENCES projects(id),
                stars INTEGER NOT NULL DEFAULT 0,
                is_deployed INTEGER NOT NULL DEFAULT 0,
                deploy_source_path TEXT,
                download_count INTEGER NOT NULL DEFAULT 0,
                visits INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS stars (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                created_at INTEGER NOT NULL,
                UNIQUE(user_id, project_id)
            );
            "#,
        )
        .context("failed to initialize catalog schema")?;
        Ok(())
    }

    fn ensure_meta(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params![META_KEY_SCHEMA_VERSION, SCHEMA_VERSION.to_string()],
        )?;
        let value: String = conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![META_KEY_SCHEMA_VERSION],
            |row| row.get(0),
        )?;
        if value != SCHEMA_VERSION.to_string() {
            return Err(anyhow!(
                "catalog schema version mismatch: expected {SCHEMA_VERSION}, found {value}"
            ));
        }
        Ok(())
    }
}

/// True when an insert failed on a UNIQUE constraint, the signal for the
/// retry-as-lookup path of concurrent lazy creation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
