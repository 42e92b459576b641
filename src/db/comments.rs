use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Paged};
use crate::models::Comment;

const COMMENT_SELECT: &str = "SELECT c.id, c.task_id, c.author_id, u.name, c.content, c.created_at, c.updated_at
     FROM comments c JOIN users u ON u.id = c.author_id";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Database {
    // ── Comments ──────────────────────────────────────────────────────

    pub fn create_comment(&self, task_id: i64, author_id: i64, content: &str) -> Result<Comment> {
        self.conn
            .execute(
                "INSERT INTO comments (task_id, author_id, content) VALUES (?1, ?2, ?3)",
                params![task_id, author_id, content],
            )
            .context("Failed to insert comment")?;
        let id = self.conn.last_insert_rowid();
        self.get_comment(id)?
            .context("Comment not found after insert")
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        self.conn
            .query_row(
                &format!("{COMMENT_SELECT} WHERE c.id = ?1"),
                params![id],
                comment_from_row,
            )
            .optional()
            .context("Failed to query comment")
    }

    /// Comments on a task, oldest first.
    pub fn list_comments(&self, task_id: i64, limit: i64, offset: i64) -> Result<Paged<Comment>> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM comments WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .context("Failed to count comments")?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{COMMENT_SELECT} WHERE c.task_id = ?1 ORDER BY c.id LIMIT ?2 OFFSET ?3"
            ))
            .context("Failed to prepare list_comments")?;
        let items = stmt
            .query_map(params![task_id, limit, offset], comment_from_row)
            .context("Failed to query comments")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read comment row")?;
        Ok(Paged { items, total })
    }

    pub fn update_comment(&self, id: i64, content: &str) -> Result<Comment> {
        self.conn
            .execute(
                "UPDATE comments SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![content, id],
            )
            .context("Failed to update comment")?;
        self.get_comment(id)?
            .context("Comment not found after update")
    }

    pub fn delete_comment(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])
            .context("Failed to delete comment")?;
        Ok(count > 0)
    }
}
