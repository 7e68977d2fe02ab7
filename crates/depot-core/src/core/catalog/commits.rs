use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use depot_domain::timestamp_secs;

use super::{is_unique_violation, Catalog, CommitRow, FileRecordRow};

/// Fields of a file record being appended under a commit.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub commit_id: String,
    pub path: String,
    pub hash: String,
    pub last_modified: i64,
    pub storage_path: String,
    pub size: u64,
}

impl Catalog {
    /// Look up or lazily create the commit row for a caller-supplied commit
    /// identifier. The id is unique across the whole catalog; the first
    /// writer to reference it wins, later pushes attach to the existing row.
    pub fn ensure_commit(
        &self,
        commit_id: &str,
        project_id: i64,
        message: &str,
        author: &str,
    ) -> Result<CommitRow> {
        let conn = self.connection()?;
        if let Some(commit) = Self::commit_row(&conn, commit_id)? {
            return Ok(commit);
        }
        let now = timestamp_secs();
        match conn.execute(
            "INSERT INTO commits(commit_id, project_id, message, author, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![commit_id, project_id, message, author, now],
        ) {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                debug!(commit_id, "concurrent commit creation, reusing existing row");
            }
            Err(err) => {
                return Err(err).context("failed to create commit row");
            }
        }
        Self::commit_row(&conn, commit_id)?
            .ok_or_else(|| anyhow!("commit row vanished after creation"))
    }

    /// The project's newest commit: maximum creation time, ties broken by
    /// insertion order.
    pub fn latest_commit(&self, project_id: i64) -> Result<Option<CommitRow>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, commit_id, project_id, message, author, created_at FROM commits \
             WHERE project_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
            params![project_id],
            Self::map_commit,
        )
        .optional()
        .context("failed to read latest commit")
    }

    pub fn commits_for_project(&self, project_id: i64) -> Result<Vec<CommitRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, commit_id, project_id, message, author, created_at FROM commits \
             WHERE project_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![project_id], Self::map_commit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Append one file record and bump the owning project's `last_updated`,
    /// in a single immediate transaction. This is the catalog half of a push;
    /// the content store has already written the bytes by the time it runs.
    pub fn record_push(&self, project_id: i64, record: &NewFileRecord) -> Result<i64> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT INTO file_records \
                 (commit_id, path, hash, last_modified, storage_path, size, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.commit_id,
                    record.path,
                    record.hash,
                    record.last_modified,
                    record.storage_path,
                    i64::try_from(record.size).unwrap_or(i64::MAX),
                    timestamp_secs(),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE projects SET last_updated = ?1 WHERE id = ?2",
                params![timestamp_secs(), project_id],
            )?;
            Ok(id)
        })
    }

    /// All file records attached to any of the project's commits.
    pub fn file_records_for_project(&self, project_id: i64) -> Result<Vec<FileRecordRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.commit_id, f.path, f.hash, f.last_modified, f.storage_path, \
                    f.size, f.created_at \
             FROM file_records f JOIN commits c ON c.commit_id = f.commit_id \
             WHERE c.project_id = ?1 ORDER BY f.id",
        )?;
        let rows = stmt
            .query_map(params![project_id], Self::map_file_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_file_record(&self, record_id: i64) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM file_records WHERE id = ?1", params![record_id])?;
        Ok(())
    }

    fn commit_row(conn: &Connection, commit_id: &str) -> Result<Option<CommitRow>> {
        conn.query_row(
            "SELECT id, commit_id, project_id, message, author, created_at FROM commits \
             WHERE commit_id = ?1",
            params![commit_id],
            Self::map_commit,
        )
        .optional()
        .context("failed to read commit row")
    }

    fn map_commit(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRow> {
        Ok(CommitRow {
            id: row.get(0)?,
            commit_id: row.get(1)?,
            project_id: row.get(2)?,
            message: row.get(3)?,
            author: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn map_file_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecordRow> {
        Ok(FileRecordRow {
            id: row.get(0)?,
            commit_id: row.get(1)?,
            path: row.get(2)?,
            hash: row.get(3)?,
            last_modified: row.get(4)?,
            storage_path: row.get(5)?,
            size: row.get::<_, i64>(6)?.try_into().unwrap_or(0),
            created_at: row.get(7)?,
        })
    }
}
