use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Transaction};

use depot_domain::timestamp_secs;

use super::{Catalog, RepoDetailsRow, StarState};

impl Catalog {
    pub fn repo_details(&self, project_id: i64) -> Result<Option<RepoDetailsRow>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT stars, is_deployed, deploy_source_path, download_count, visits \
             FROM repo_details WHERE project_id = ?1",
            params![project_id],
            |row| {
                Ok(RepoDetailsRow {
                    stars: row.get(0)?,
                    is_deployed: row.get::<_, i64>(1)? != 0,
                    deploy_source_path: row.get(2)?,
                    download_count: row.get(3)?,
                    visits: row.get(4)?,
                })
            },
        )
        .optional()
        .context("failed to read repo details")
    }

    pub fn star_exists(&self, user_id: i64, project_id: i64) -> Result<bool> {
        let conn = self.connection()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM stars WHERE user_id = ?1 AND project_id = ?2 LIMIT 1",
                params![user_id, project_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(found)
    }

    /// Toggle the viewer's star on a project, keeping the denormalized count
    /// on `repo_details` in step within one transaction.
    pub fn toggle_star(&self, user_id: i64, project_id: i64) -> Result<StarState> {
        self.with_immediate_tx(|tx| {
            Self::ensure_details_row(tx, project_id)?;
            let existing = tx
                .query_row(
                    "SELECT id FROM stars WHERE user_id = ?1 AND project_id = ?2",
                    params![user_id, project_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            let starred = match existing {
                Some(star_id) => {
                    tx.execute("DELETE FROM stars WHERE id = ?1", params![star_id])?;
                    tx.execute(
                        "UPDATE repo_details SET stars = MAX(0, stars - 1) WHERE project_id = ?1",
                        params![project_id],
                    )?;
                    false
                }
                None => {
                    tx.execute(
                        "INSERT INTO stars(user_id, project_id, created_at) VALUES (?1, ?2, ?3)",
                        params![user_id, project_id, timestamp_secs()],
                    )?;
                    tx.execute(
                        "UPDATE repo_details SET stars = stars + 1 WHERE project_id = ?1",
                        params![project_id],
                    )?;
                    true
                }
            };
            let total_stars: i64 = tx.query_row(
                "SELECT stars FROM repo_details WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            Ok(StarState {
                starred,
                total_stars,
            })
        })
    }

    /// Flag a project as deployed from `source` (or clear the flag with
    /// `None`).
    pub fn set_deploy(&self, project_id: i64, source: Option<&str>) -> Result<()> {
        self.with_immediate_tx(|tx| {
            Self::ensure_details_row(tx, project_id)?;
            match source {
                Some(path) => {
                    tx.execute(
                        "UPDATE repo_details SET is_deployed = 1, deploy_source_path = ?2 \
                         WHERE project_id = ?1",
                        params![project_id, path],
                    )?;
                }
                None => {
                    tx.execute(
                        "UPDATE repo_details SET is_deployed = 0 WHERE project_id = ?1",
                        params![project_id],
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn bump_download_count(&self, project_id: i64) -> Result<()> {
        self.with_immediate_tx(|tx| {
            Self::ensure_details_row(tx, project_id)?;
            tx.execute(
                "UPDATE repo_details SET download_count = download_count + 1 \
                 WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(())
        })
    }

    fn ensure_details_row(tx: &Transaction<'_>, project_id: i64) -> Result<()> {
        tx.execute(
            "INSERT OR IGNORE INTO repo_details(project_id) VALUES (?1)",
            params![project_id],
        )?;
        Ok(())
    }
}
