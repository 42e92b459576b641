use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Paged, like_pattern};
use crate::models::User;

const USER_COLUMNS: &str = "id, email, name, avatar_url, created_at, updated_at";

/// A user together with their stored password hash. Only used for login and
/// password changes; never serialized.
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Database {
    // ── User CRUD ─────────────────────────────────────────────────────

    /// Insert a user unless the email is already taken. The uniqueness check
    /// and the insert are one statement, so concurrent registrations for the
    /// same address yield exactly one user.
    pub fn create_user(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<Option<User>> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO users (email, name, password_hash) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
                params![email.trim().to_lowercase(), name.trim(), password_hash],
            )
            .context("Failed to insert user")?;
        if inserted == 0 {
            return Ok(None);
        }
        let id = self.conn.last_insert_rowid();
        self.get_user(id)
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim()],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by email")
    }

    pub fn get_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1"),
                params![email.trim()],
                |row| {
                    Ok(Credentials {
                        user: user_from_row(row)?,
                        password_hash: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")
    }

    pub fn get_password_hash(&self, user_id: i64) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query password hash")
    }

    pub fn update_user(
        &self,
        id: i64,
        name: Option<&str>,
        avatar_url: Option<Option<&str>>,
    ) -> Result<User> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(n) = name {
            tx.execute(
                "UPDATE users SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![n.trim(), id],
            )
            .context("Failed to update user name")?;
        }
        if let Some(a) = avatar_url {
            tx.execute(
                "UPDATE users SET avatar_url = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![a, id],
            )
            .context("Failed to update user avatar")?;
        }
        tx.commit().context("Failed to commit user update")?;
        self.get_user(id)?.context("User not found after update")
    }

    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![password_hash, id],
            )
            .context("Failed to update password")?;
        Ok(())
    }

    /// Case-insensitive substring search over name and email.
    pub fn search_users(&self, query: Option<&str>, limit: i64, offset: i64) -> Result<Paged<User>> {
        let pattern = like_pattern(query.unwrap_or(""));
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'",
                params![pattern],
                |row| row.get(0),
            )
            .context("Failed to count users")?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'
                 ORDER BY name, id LIMIT ?2 OFFSET ?3"
            ))
            .context("Failed to prepare search_users")?;
        let items = stmt
            .query_map(params![pattern, limit, offset], user_from_row)
            .context("Failed to query users")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read user row")?;
        Ok(Paged { items, total })
    }
}
