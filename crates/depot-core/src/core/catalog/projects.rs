use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use depot_domain::timestamp_secs;

use super::{is_unique_violation, Catalog, Project};

impl Catalog {
    /// Look up or lazily create the project owned by `user_id`. Creation is
    /// idempotent under concurrent first-pushes: a unique-constraint failure
    /// means another writer won the insert, so the row is re-read instead.
    pub fn ensure_project(&self, user_id: i64, name: &str) -> Result<Project> {
        let conn = self.connection()?;
        if let Some(project) = Self::project_row(&conn, user_id, name)? {
            return Ok(project);
        }
        let now = timestamp_secs();
        match conn.execute(
            "INSERT INTO projects(user_id, name, created_at, last_updated) \
             VALUES (?1, ?2, ?3, ?3)",
            params![user_id, name, now],
        ) {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                debug!(user_id, name, "concurrent project creation, reusing existing row");
            }
            Err(err) => {
                return Err(err).context("failed to create project row");
            }
        }
        Self::project_row(&conn, user_id, name)?
            .ok_or_else(|| anyhow!("project row vanished after creation"))
    }

    pub fn project_by_owner(&self, user_id: i64, name: &str) -> Result<Option<Project>> {
        let conn = self.connection()?;
        Self::project_row(&conn, user_id, name)
    }

    pub fn projects_for_user(&self, user_id: i64) -> Result<Vec<Project>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, created_at, last_updated FROM projects \
             WHERE user_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![user_id], Self::map_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn projects_all(&self) -> Result<Vec<Project>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, created_at, last_updated FROM projects ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::map_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Case-insensitive substring search over project names, joined with the
    /// owner's username for display.
    pub fn search_projects(&self, query: &str) -> Result<Vec<(Project, String)>> {
        let conn = self.connection()?;
        let needle = format!("%{}%", query.to_lowercase());
        let mut stmt = conn.prepare(
            "SELECT p.id, p.user_id, p.name, p.created_at, p.last_updated, u.username \
             FROM projects p JOIN users u ON u.id = p.user_id \
             WHERE LOWER(p.name) LIKE ?1 ORDER BY p.name",
        )?;
        let rows = stmt
            .query_map(params![needle], |row| {
                Ok((Self::map_project(row)?, row.get::<_, String>(5)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete a project and everything hanging off it in one transaction:
    /// stars, repo details, file records for its commits, the commits, and
    /// finally the project row itself.
    pub fn delete_project_cascade(&self, project_id: i64) -> Result<()> {
        self.with_immediate_tx(|tx| {
            tx.execute("DELETE FROM stars WHERE project_id = ?1", params![project_id])?;
            tx.execute(
                "DELETE FROM repo_details WHERE project_id = ?1",
                params![project_id],
            )?;
            tx.execute(
                "DELETE FROM file_records WHERE commit_id IN \
                 (SELECT commit_id FROM commits WHERE project_id = ?1)",
                params![project_id],
            )?;
            tx.execute("DELETE FROM commits WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
            Ok(())
        })
    }

    pub(super) fn project_row(
        conn: &Connection,
        user_id: i64,
        name: &str,
    ) -> Result<Option<Project>> {
        conn.query_row(
            "SELECT id, user_id, name, created_at, last_updated FROM projects \
             WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
            Self::map_project,
        )
        .optional()
        .context("failed to read project row")
    }

    pub(super) fn map_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
        Ok(Project {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
            last_updated: row.get(4)?,
        })
    }
}
