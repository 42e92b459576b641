use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use super::Database;
use crate::models::User;

impl Database {
    // ── Sessions (bearer tokens) ──────────────────────────────────────

    /// Store the hash of a freshly issued token, valid for `ttl_hours`.
    pub fn create_session(&self, user_id: i64, token_hash: &str, ttl_hours: u32) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (user_id, token_hash, expires_at)
                 VALUES (?1, ?2, datetime('now', ?3))",
                params![user_id, token_hash, format!("+{} hours", ttl_hours)],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    /// Resolve an unexpired session to its user.
    pub fn find_session_user(&self, token_hash: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT u.id, u.email, u.name, u.avatar_url, u.created_at, u.updated_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > datetime('now')",
                params![token_hash],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                        avatar_url: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("Failed to query session")
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    /// Revoke every session of a user except the one identified by `keep`.
    pub fn delete_other_sessions(&self, user_id: i64, keep: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE user_id = ?1 AND token_hash != ?2",
                params![user_id, keep],
            )
            .context("Failed to revoke sessions")
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])
            .context("Failed to purge expired sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    #[test]
    fn test_session_lifecycle() -> Result<()> {
        let db = Database::new_in_memory()?;
        let user = test_support::user(&db, "ada@example.com");

        db.create_session(user.id, "abc", 24)?;
        let found = db.find_session_user("abc")?.expect("session user");
        assert_eq!(found.id, user.id);
        assert!(db.find_session_user("zzz")?.is_none());

        assert!(db.delete_session("abc")?);
        assert!(!db.delete_session("abc")?);
        assert!(db.find_session_user("abc")?.is_none());
        Ok(())
    }

    #[test]
    fn test_expired_session_is_ignored_and_purged() -> Result<()> {
        let db = Database::new_in_memory()?;
        let user = test_support::user(&db, "ada@example.com");
        db.conn.execute(
            "INSERT INTO sessions (user_id, token_hash, expires_at) VALUES (?1, 'old', datetime('now', '-1 hours'))",
            params![user.id],
        )?;
        assert!(db.find_session_user("old")?.is_none());
        assert_eq!(db.purge_expired_sessions()?, 1);
        Ok(())
    }

    #[test]
    fn test_delete_other_sessions_keeps_current() -> Result<()> {
        let db = Database::new_in_memory()?;
        let user = test_support::user(&db, "ada@example.com");
        db.create_session(user.id, "a", 1)?;
        db.create_session(user.id, "b", 1)?;
        db.create_session(user.id, "c", 1)?;

        assert_eq!(db.delete_other_sessions(user.id, "b")?, 2);
        assert!(db.find_session_user("b")?.is_some());
        assert!(db.find_session_user("a")?.is_none());
        Ok(())
    }
}
