use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use super::{Database, Paged};
use crate::models::{NewNotification, Notification, NotificationKind};

/// Intermediate row struct for notifications.
struct NotificationRow {
    id: i64,
    user_id: i64,
    kind: String,
    title: String,
    message: String,
    project_id: Option<i64>,
    task_id: Option<i64>,
    is_read: bool,
    created_at: String,
}

impl NotificationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(NotificationRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            title: row.get(3)?,
            message: row.get(4)?,
            project_id: row.get(5)?,
            task_id: row.get(6)?,
            is_read: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_notification(self) -> Result<Notification> {
        let kind = NotificationKind::from_str(&self.kind)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse notification kind")?;
        Ok(Notification {
            id: self.id,
            user_id: self.user_id,
            kind,
            title: self.title,
            message: self.message,
            project_id: self.project_id,
            task_id: self.task_id,
            is_read: self.is_read,
            created_at: self.created_at,
        })
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, title, message, project_id, task_id, is_read, created_at";

impl Database {
    // ── Notifications ─────────────────────────────────────────────────

    pub fn create_notification(&self, new: &NewNotification) -> Result<Notification> {
        self.conn
            .execute(
                "INSERT INTO notifications (user_id, kind, title, message, project_id, task_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.user_id,
                    new.kind.as_str(),
                    new.title,
                    new.message,
                    new.project_id,
                    new.task_id,
                ],
            )
            .context("Failed to insert notification")?;
        let id = self.conn.last_insert_rowid();
        self.get_notification(id)?
            .context("Notification not found after insert")
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<Notification>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![id],
                NotificationRow::from_row,
            )
            .optional()
            .context("Failed to query notification")?;
        row.map(NotificationRow::into_notification).transpose()
    }

    /// A user's notifications, newest first.
    pub fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Paged<Notification>> {
        let filter = if unread_only { " AND is_read = 0" } else { "" };
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM notifications WHERE user_id = ?1{filter}"),
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count notifications")?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = ?1{filter}
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3"
            ))
            .context("Failed to prepare list_notifications")?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], NotificationRow::from_row)
            .context("Failed to query notifications")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read notification row")?.into_notification()?);
        }
        Ok(Paged { items, total })
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count unread notifications")
    }

    /// Mark one notification read. Only matches when `user_id` is the recipient.
    pub fn mark_notification_read(&self, id: i64, user_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to mark notification read")?;
        Ok(count > 0)
    }

    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
            )
            .context("Failed to mark notifications read")
    }

    pub fn delete_notification(&self, id: i64, user_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete notification")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    fn notify(db: &Database, user_id: i64, title: &str) -> Notification {
        db.create_notification(&NewNotification {
            user_id,
            kind: NotificationKind::TaskAssigned,
            title: title.into(),
            message: String::new(),
            project_id: None,
            task_id: None,
        })
        .unwrap()
    }

    #[test]
    fn test_create_and_list_newest_first() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        notify(&db, ada.id, "first");
        notify(&db, ada.id, "second");

        let page = db.list_notifications(ada.id, false, 10, 0)?;
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].title, "second");
        assert!(!page.items[0].is_read);
        assert_eq!(page.items[0].kind, NotificationKind::TaskAssigned);
        Ok(())
    }

    #[test]
    fn test_mark_read_and_unread_filter() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let bob = test_support::user(&db, "bob@example.com");
        let first = notify(&db, ada.id, "first");
        notify(&db, ada.id, "second");

        assert!(!db.mark_notification_read(first.id, bob.id)?);
        assert!(db.mark_notification_read(first.id, ada.id)?);
        assert_eq!(db.unread_notification_count(ada.id)?, 1);

        let unread = db.list_notifications(ada.id, true, 10, 0)?;
        assert_eq!(unread.total, 1);
        assert_eq!(unread.items[0].title, "second");

        assert_eq!(db.mark_all_notifications_read(ada.id)?, 1);
        assert_eq!(db.unread_notification_count(ada.id)?, 0);
        Ok(())
    }

    #[test]
    fn test_delete_only_by_recipient() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let bob = test_support::user(&db, "bob@example.com");
        let n = notify(&db, ada.id, "mine");

        assert!(!db.delete_notification(n.id, bob.id)?);
        assert!(db.delete_notification(n.id, ada.id)?);
        assert!(db.get_notification(n.id)?.is_none());
        Ok(())
    }
}
