use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Paged};
use crate::models::{TimeEntry, TimeSummary, UserTime};

const ENTRY_COLUMNS: &str =
    "id, task_id, user_id, description, started_at, ended_at, duration_seconds";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user_id: row.get(2)?,
        description: row.get(3)?,
        started_at: row.get(4)?,
        ended_at: row.get(5)?,
        duration_seconds: row.get(6)?,
    })
}

impl Database {
    // ── Time tracking ─────────────────────────────────────────────────

    pub fn get_time_entry(&self, id: i64) -> Result<Option<TimeEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE id = ?1"),
                params![id],
                entry_from_row,
            )
            .optional()
            .context("Failed to query time entry")
    }

    pub fn get_running_entry(&self, user_id: i64) -> Result<Option<TimeEntry>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM time_entries WHERE user_id = ?1 AND ended_at IS NULL"
                ),
                params![user_id],
                entry_from_row,
            )
            .optional()
            .context("Failed to query running time entry")
    }

    /// Start a timer. Fails if the user already has one running; the partial
    /// unique index `idx_time_entries_running` backs this up.
    pub fn start_timer(&self, task_id: i64, user_id: i64, description: &str) -> Result<TimeEntry> {
        self.conn
            .execute(
                "INSERT INTO time_entries (task_id, user_id, description) VALUES (?1, ?2, ?3)",
                params![task_id, user_id, description],
            )
            .context("Failed to start timer")?;
        let id = self.conn.last_insert_rowid();
        self.get_time_entry(id)?
            .context("Time entry not found after insert")
    }

    /// Stop the user's running timer, if any, recording its duration.
    pub fn stop_timer(&self, user_id: i64) -> Result<Option<TimeEntry>> {
        let Some(running) = self.get_running_entry(user_id)? else {
            return Ok(None);
        };
        self.conn
            .execute(
                "UPDATE time_entries
                 SET ended_at = datetime('now'),
                     duration_seconds = MAX(0, CAST(ROUND((julianday('now') - julianday(started_at)) * 86400) AS INTEGER))
                 WHERE id = ?1",
                params![running.id],
            )
            .context("Failed to stop timer")?;
        self.get_time_entry(running.id)
    }

    /// Record a completed interval. Timestamps use the SQLite
    /// `YYYY-MM-DD HH:MM:SS` UTC format.
    pub fn create_manual_entry(
        &self,
        task_id: i64,
        user_id: i64,
        description: &str,
        started_at: &str,
        ended_at: &str,
    ) -> Result<TimeEntry> {
        self.conn
            .execute(
                "INSERT INTO time_entries (task_id, user_id, description, started_at, ended_at, duration_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, CAST(ROUND((julianday(?5) - julianday(?4)) * 86400) AS INTEGER))",
                params![task_id, user_id, description, started_at, ended_at],
            )
            .context("Failed to insert manual time entry")?;
        let id = self.conn.last_insert_rowid();
        self.get_time_entry(id)?
            .context("Time entry not found after insert")
    }

    /// A user's time entries, newest first, optionally limited to one task.
    pub fn list_time_entries(
        &self,
        user_id: i64,
        task_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Paged<TimeEntry>> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM time_entries WHERE user_id = ?1 AND (?2 IS NULL OR task_id = ?2)",
                params![user_id, task_id],
                |row| row.get(0),
            )
            .context("Failed to count time entries")?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM time_entries
                 WHERE user_id = ?1 AND (?2 IS NULL OR task_id = ?2)
                 ORDER BY id DESC LIMIT ?3 OFFSET ?4"
            ))
            .context("Failed to prepare list_time_entries")?;
        let items = stmt
            .query_map(params![user_id, task_id, limit, offset], entry_from_row)
            .context("Failed to query time entries")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read time entry row")?;
        Ok(Paged { items, total })
    }

    /// Delete one of `user_id`'s entries, returning it. Other users' entries
    /// are left alone and reported as `None`.
    pub fn delete_time_entry(&self, id: i64, user_id: i64) -> Result<Option<TimeEntry>> {
        let Some(entry) = self.get_time_entry(id)?.filter(|e| e.user_id == user_id) else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM time_entries WHERE id = ?1", params![id])
            .context("Failed to delete time entry")?;
        Ok(Some(entry))
    }

    /// Completed tracked time on a task, in total and per user.
    pub fn task_time_summary(&self, task_id: i64) -> Result<TimeSummary> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT e.user_id, u.name, SUM(e.duration_seconds)
                 FROM time_entries e JOIN users u ON u.id = e.user_id
                 WHERE e.task_id = ?1 AND e.ended_at IS NOT NULL
                 GROUP BY e.user_id, u.name
                 ORDER BY SUM(e.duration_seconds) DESC, e.user_id",
            )
            .context("Failed to prepare task_time_summary")?;
        let by_user = stmt
            .query_map(params![task_id], |row| {
                Ok(UserTime {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    total_seconds: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                })
            })
            .context("Failed to query time summary")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read time summary row")?;
        let total_seconds = by_user.iter().map(|u| u.total_seconds).sum();
        Ok(TimeSummary {
            task_id,
            total_seconds,
            by_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    #[test]
    fn test_start_and_stop_timer() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let task = test_support::task(&db, &project, &ada, "t1");

        let entry = db.start_timer(task.id, ada.id, "deep work")?;
        assert!(entry.is_running());
        assert_eq!(db.get_running_entry(ada.id)?.map(|e| e.id), Some(entry.id));

        let stopped = db.stop_timer(ada.id)?.expect("stopped entry");
        assert!(!stopped.is_running());
        assert!(stopped.duration_seconds.expect("duration") >= 0);
        assert!(db.get_running_entry(ada.id)?.is_none());
        assert!(db.stop_timer(ada.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_second_running_timer_is_rejected() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let t1 = test_support::task(&db, &project, &ada, "t1");
        let t2 = test_support::task(&db, &project, &ada, "t2");

        db.start_timer(t1.id, ada.id, "")?;
        assert!(db.start_timer(t2.id, ada.id, "").is_err());
        Ok(())
    }

    #[test]
    fn test_manual_entry_duration_and_summary() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let bob = test_support::user(&db, "bob@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let task = test_support::task(&db, &project, &ada, "t1");

        let entry = db.create_manual_entry(
            task.id,
            ada.id,
            "pairing",
            "2024-03-01 09:00:00",
            "2024-03-01 10:30:00",
        )?;
        assert_eq!(entry.duration_seconds, Some(5400));
        db.create_manual_entry(task.id, bob.id, "", "2024-03-01 09:00:00", "2024-03-01 09:10:00")?;
        db.start_timer(task.id, bob.id, "still going")?;

        let summary = db.task_time_summary(task.id)?;
        assert_eq!(summary.total_seconds, 6000);
        assert_eq!(summary.by_user.len(), 2);
        assert_eq!(summary.by_user[0].name, "ada");
        assert_eq!(summary.by_user[1].total_seconds, 600);

        let stats = db.project_stats(project.id)?;
        assert_eq!(stats.tracked_seconds, 6000);
        Ok(())
    }

    #[test]
    fn test_list_and_delete_own_entries() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let bob = test_support::user(&db, "bob@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let t1 = test_support::task(&db, &project, &ada, "t1");
        let t2 = test_support::task(&db, &project, &ada, "t2");

        let e1 = db.create_manual_entry(t1.id, ada.id, "", "2024-03-01 09:00:00", "2024-03-01 09:01:00")?;
        db.create_manual_entry(t2.id, ada.id, "", "2024-03-01 10:00:00", "2024-03-01 10:01:00")?;

        let all = db.list_time_entries(ada.id, None, 10, 0)?;
        assert_eq!(all.total, 2);
        let only_t1 = db.list_time_entries(ada.id, Some(t1.id), 10, 0)?;
        assert_eq!(only_t1.total, 1);
        assert_eq!(only_t1.items[0].id, e1.id);

        assert!(db.delete_time_entry(e1.id, bob.id)?.is_none());
        assert_eq!(db.delete_time_entry(e1.id, ada.id)?.map(|e| e.id), Some(e1.id));
        assert!(db.get_time_entry(e1.id)?.is_none());
        assert_eq!(db.list_time_entries(ada.id, None, 10, 0)?.total, 1);
        Ok(())
    }
}
