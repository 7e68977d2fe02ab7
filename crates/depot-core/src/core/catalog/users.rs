use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use depot_domain::timestamp_secs;

use super::{Catalog, User};

impl Catalog {
    /// Register an account. Normally the auth layer owns this; the engine
    /// exposes it for local/admin setups and tests.
    pub fn create_user(&self, username: &str, email: &str, api_key: &str) -> Result<User> {
        let conn = self.connection()?;
        let now = timestamp_secs();
        match conn.execute(
            "INSERT INTO users(username, email, api_key, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![username, email, api_key, now],
        ) {
            Ok(_) => {}
            Err(err) if super::is_unique_violation(&err) => {
                return Err(crate::error::DepotError::Conflict(format!(
                    "username or email already registered ({username})"
                ))
                .into());
            }
            Err(err) => return Err(err).context("failed to create user row"),
        }
        Self::user_row_by_name(&conn, username)?
            .ok_or_else(|| anyhow!("user row vanished after creation"))
    }

    pub fn user_by_name(&self, username: &str) -> Result<Option<User>> {
        let conn = self.connection()?;
        Self::user_row_by_name(&conn, username)
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, username, email, api_key, created_at FROM users WHERE id = ?1",
            params![id],
            Self::map_user,
        )
        .optional()
        .context("failed to read user row")
    }

    /// Remove an account row. Projects it owned become orphans repaired by
    /// the next audit sweep.
    pub fn remove_user(&self, username: &str) -> Result<bool> {
        let conn = self.connection()?;
        let removed = conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
        Ok(removed > 0)
    }

    pub(super) fn user_row_by_name(conn: &Connection, username: &str) -> Result<Option<User>> {
        conn.query_row(
            "SELECT id, username, email, api_key, created_at FROM users WHERE username = ?1",
            params![username],
            Self::map_user,
        )
        .optional()
        .context("failed to read user row")
    }

    fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            api_key: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}
