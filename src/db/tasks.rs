use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::{Database, Paged, like_pattern};
use crate::models::*;

const TASK_COLUMNS: &str = "t.id, t.project_id, t.title, t.description, t.status, t.priority, t.task_type,
     t.assignee_id, t.reporter_id, t.due_date, t.estimated_hours, t.position, t.created_at, t.updated_at";

/// Intermediate row struct for tasks; enum columns are parsed in `into_task`.
struct TaskRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    status: String,
    priority: String,
    task_type: String,
    assignee_id: Option<i64>,
    reporter_id: i64,
    due_date: Option<String>,
    estimated_hours: Option<f64>,
    position: i32,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(TaskRow {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            task_type: row.get(6)?,
            assignee_id: row.get(7)?,
            reporter_id: row.get(8)?,
            due_date: row.get(9)?,
            estimated_hours: row.get(10)?,
            position: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        let priority = TaskPriority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task priority")?;
        let task_type = TaskType::from_str(&self.task_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task type")?;
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            status,
            priority,
            task_type,
            assignee_id: self.assignee_id,
            reporter_id: self.reporter_id,
            due_date: self.due_date,
            estimated_hours: self.estimated_hours,
            position: self.position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Ids of a kanban column in display order, optionally leaving one task out.
fn column_ids(
    conn: &Connection,
    project_id: i64,
    status: TaskStatus,
    exclude: Option<i64>,
) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM tasks WHERE project_id = ?1 AND status = ?2 AND id != ?3
             ORDER BY position, id",
        )
        .context("Failed to prepare column query")?;
    let ids = stmt
        .query_map(params![project_id, status.as_str(), exclude.unwrap_or(-1)], |row| {
            row.get(0)
        })
        .context("Failed to query column")?
        .collect::<rusqlite::Result<Vec<i64>>>()
        .context("Failed to read column id")?;
    Ok(ids)
}

/// Rewrite positions so the given ids occupy `0..n` in order.
fn write_positions(conn: &Connection, ids: &[i64]) -> Result<()> {
    let mut stmt = conn
        .prepare("UPDATE tasks SET position = ?1 WHERE id = ?2")
        .context("Failed to prepare position update")?;
    for (pos, id) in ids.iter().enumerate() {
        stmt.execute(params![pos as i64, id])
            .context("Failed to update task position")?;
    }
    Ok(())
}

impl Database {
    // ── Task CRUD ─────────────────────────────────────────────────────

    /// Insert a task at the end of its status column.
    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM tasks WHERE project_id = ?1 AND status = ?2",
                params![new.project_id, new.status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to get max position")?;

        self.conn
            .execute(
                "INSERT INTO tasks (project_id, title, description, status, priority, task_type,
                    assignee_id, reporter_id, due_date, estimated_hours, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    new.project_id,
                    new.title.trim(),
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.task_type.as_str(),
                    new.assignee_id,
                    new.reporter_id,
                    new.due_date,
                    new.estimated_hours,
                    max_pos + 1,
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Tasks visible to `user_id` (projects they belong to), newest first.
    pub fn list_tasks(
        &self,
        user_id: i64,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Paged<Task>> {
        let mut clauses =
            vec!["t.project_id IN (SELECT project_id FROM project_members WHERE user_id = ?)"];
        let mut args: Vec<Value> = vec![Value::from(user_id)];
        if let Some(project_id) = filter.project_id {
            clauses.push("t.project_id = ?");
            args.push(Value::from(project_id));
        }
        if let Some(status) = filter.status {
            clauses.push("t.status = ?");
            args.push(Value::from(status.as_str().to_string()));
        }
        if let Some(priority) = filter.priority {
            clauses.push("t.priority = ?");
            args.push(Value::from(priority.as_str().to_string()));
        }
        if let Some(assignee_id) = filter.assignee_id {
            clauses.push("t.assignee_id = ?");
            args.push(Value::from(assignee_id));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push("(t.title LIKE ? ESCAPE '\\' OR t.description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            args.push(Value::from(pattern.clone()));
            args.push(Value::from(pattern));
        }
        let where_sql = clauses.join(" AND ");

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM tasks t WHERE {where_sql}"),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .context("Failed to count tasks")?;

        args.push(Value::from(limit));
        args.push(Value::from(offset));
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks t WHERE {where_sql}
                 ORDER BY t.id DESC LIMIT ? OFFSET ?"
            ))
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(Paged { items, total })
    }

    pub fn update_task(&self, id: i64, changes: &TaskChanges) -> Result<Task> {
        // Use unchecked_transaction so all updates are atomic.
        // DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(t) = &changes.title {
            tx.execute(
                "UPDATE tasks SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![t.trim(), id],
            )
            .context("Failed to update task title")?;
        }
        if let Some(d) = &changes.description {
            tx.execute(
                "UPDATE tasks SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![d, id],
            )
            .context("Failed to update task description")?;
        }
        if let Some(p) = changes.priority {
            tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![p.as_str(), id],
            )
            .context("Failed to update task priority")?;
        }
        if let Some(t) = changes.task_type {
            tx.execute(
                "UPDATE tasks SET task_type = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![t.as_str(), id],
            )
            .context("Failed to update task type")?;
        }
        if let Some(due) = &changes.due_date {
            tx.execute(
                "UPDATE tasks SET due_date = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![due, id],
            )
            .context("Failed to update task due date")?;
        }
        if let Some(hours) = changes.estimated_hours {
            tx.execute(
                "UPDATE tasks SET estimated_hours = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![hours, id],
            )
            .context("Failed to update task estimate")?;
        }

        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)?.context("Task not found after update")
    }

    pub fn assign_task(&self, id: i64, assignee_id: Option<i64>) -> Result<Task> {
        self.conn
            .execute(
                "UPDATE tasks SET assignee_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![assignee_id, id],
            )
            .context("Failed to assign task")?;
        self.get_task(id)?.context("Task not found after assign")
    }

    /// Change a task's status, appending it to the end of the new column.
    /// Setting the current status is a no-op. `None` when the task is gone.
    pub fn set_task_status(&self, id: i64, status: TaskStatus) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        if task.status == status {
            return Ok(Some(task));
        }
        self.move_task(id, status, i32::MAX)
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let Some(task) = self.get_task(id)? else {
            return Ok(false);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        let remaining = column_ids(&tx, task.project_id, task.status, None)?;
        write_positions(&tx, &remaining)?;
        tx.commit().context("Failed to commit task deletion")?;
        Ok(true)
    }

    // ── Kanban ────────────────────────────────────────────────────────

    /// Move a task to `status` at `position` (clamped to the column length),
    /// leaving both the source and target columns densely numbered.
    pub fn move_task(&self, id: i64, status: TaskStatus, position: i32) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if task.status != status {
            let source = column_ids(&tx, task.project_id, task.status, Some(id))?;
            write_positions(&tx, &source)?;
        }

        let mut target = column_ids(&tx, task.project_id, status, Some(id))?;
        let index = (position.max(0) as usize).min(target.len());
        target.insert(index, id);

        tx.execute(
            "UPDATE tasks SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), id],
        )
        .context("Failed to move task")?;
        write_positions(&tx, &target)?;

        tx.commit().context("Failed to commit task move")?;
        self.get_task(id)
    }

    pub fn list_project_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.project_id = ?1 ORDER BY t.position, t.id"
            ))
            .context("Failed to prepare list_project_tasks")?;
        let rows = stmt
            .query_map(params![project_id], TaskRow::from_row)
            .context("Failed to query project tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(tasks)
    }

    pub fn get_board(&self, project_id: i64) -> Result<BoardView> {
        let project = self
            .get_project(project_id)?
            .context("Project not found for board view")?;
        let all_tasks = self.list_project_tasks(project_id)?;

        let columns = TaskStatus::ALL
            .iter()
            .map(|status| ColumnView {
                status: *status,
                tasks: all_tasks
                    .iter()
                    .filter(|t| t.status == *status)
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(BoardView { project, columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    fn positions(db: &Database, project_id: i64, status: TaskStatus) -> Vec<(String, i32)> {
        db.get_board(project_id)
            .unwrap()
            .columns
            .into_iter()
            .find(|c| c.status == status)
            .unwrap()
            .tasks
            .into_iter()
            .map(|t| (t.title, t.position))
            .collect()
    }

    #[test]
    fn test_create_task_appends_to_column() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");

        let a = test_support::task(&db, &project, &ada, "a");
        let b = test_support::task(&db, &project, &ada, "b");
        let c = test_support::task_in(&db, &project, &ada, "c", TaskStatus::Done);
        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);
        assert_eq!(c.position, 0);
        assert_eq!(a.status, TaskStatus::Todo);
        assert_eq!(a.priority, TaskPriority::Medium);
        assert_eq!(a.reporter_id, ada.id);
        Ok(())
    }

    #[test]
    fn test_update_task_fields() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let task = test_support::task(&db, &project, &ada, "a");

        let updated = db.update_task(
            task.id,
            &TaskChanges {
                title: Some("renamed".into()),
                priority: Some(TaskPriority::Urgent),
                task_type: Some(TaskType::Bug),
                due_date: Some(Some("2030-01-31".into())),
                estimated_hours: Some(Some(2.5)),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.priority, TaskPriority::Urgent);
        assert_eq!(updated.task_type, TaskType::Bug);
        assert_eq!(updated.due_date.as_deref(), Some("2030-01-31"));
        assert_eq!(updated.estimated_hours, Some(2.5));
        assert_eq!(updated.description, "");

        let cleared = db.update_task(
            task.id,
            &TaskChanges {
                due_date: Some(None),
                ..Default::default()
            },
        )?;
        assert!(cleared.due_date.is_none());
        assert_eq!(cleared.estimated_hours, Some(2.5));
        Ok(())
    }

    #[test]
    fn test_list_tasks_filters_and_scopes_by_membership() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let bob = test_support::user(&db, "bob@example.com");
        let mine = test_support::project(&db, &ada, "mine");
        let theirs = test_support::project(&db, &bob, "theirs");
        test_support::task(&db, &mine, &ada, "write docs");
        let bug = test_support::task_in(&db, &mine, &ada, "fix login bug", TaskStatus::InProgress);
        test_support::task(&db, &theirs, &bob, "secret");
        db.assign_task(bug.id, Some(ada.id))?;

        let all = db.list_tasks(ada.id, &TaskFilter::default(), 20, 0)?;
        assert_eq!(all.total, 2);
        assert_eq!(all.items[0].title, "fix login bug");

        let by_status = db.list_tasks(
            ada.id,
            &TaskFilter {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
            20,
            0,
        )?;
        assert_eq!(by_status.total, 1);

        let by_assignee = db.list_tasks(
            ada.id,
            &TaskFilter {
                assignee_id: Some(ada.id),
                ..Default::default()
            },
            20,
            0,
        )?;
        assert_eq!(by_assignee.items[0].id, bug.id);

        let search = db.list_tasks(
            ada.id,
            &TaskFilter {
                search: Some("docs".into()),
                ..Default::default()
            },
            20,
            0,
        )?;
        assert_eq!(search.total, 1);

        let wildcard = db.list_tasks(
            ada.id,
            &TaskFilter {
                search: Some("_".into()),
                ..Default::default()
            },
            20,
            0,
        )?;
        assert_eq!(wildcard.total, 0);

        let other = db.list_tasks(
            ada.id,
            &TaskFilter {
                project_id: Some(theirs.id),
                ..Default::default()
            },
            20,
            0,
        )?;
        assert_eq!(other.total, 0);
        Ok(())
    }

    #[test]
    fn test_list_tasks_paginates() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        for i in 0..5 {
            test_support::task(&db, &project, &ada, &format!("t{i}"));
        }
        let page = db.list_tasks(ada.id, &TaskFilter::default(), 2, 2)?;
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].title, "t2");
        Ok(())
    }

    #[test]
    fn test_move_within_column_reorders() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        test_support::task(&db, &project, &ada, "a");
        test_support::task(&db, &project, &ada, "b");
        let c = test_support::task(&db, &project, &ada, "c");

        db.move_task(c.id, TaskStatus::Todo, 0)?.expect("task exists");
        assert_eq!(
            positions(&db, project.id, TaskStatus::Todo),
            vec![("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_move_across_columns_keeps_both_dense() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let a = test_support::task(&db, &project, &ada, "a");
        test_support::task(&db, &project, &ada, "b");
        test_support::task_in(&db, &project, &ada, "x", TaskStatus::InProgress);
        test_support::task_in(&db, &project, &ada, "y", TaskStatus::InProgress);

        let moved = db.move_task(a.id, TaskStatus::InProgress, 1)?.expect("task exists");
        assert_eq!(moved.status, TaskStatus::InProgress);
        assert_eq!(moved.position, 1);
        assert_eq!(positions(&db, project.id, TaskStatus::Todo), vec![("b".into(), 0)]);
        assert_eq!(
            positions(&db, project.id, TaskStatus::InProgress),
            vec![("x".into(), 0), ("a".into(), 1), ("y".into(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_move_clamps_position() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let a = test_support::task(&db, &project, &ada, "a");
        test_support::task_in(&db, &project, &ada, "x", TaskStatus::Done);

        let moved = db.move_task(a.id, TaskStatus::Done, 99)?.expect("task exists");
        assert_eq!(moved.position, 1);
        let moved = db.move_task(a.id, TaskStatus::Done, -5)?.expect("task exists");
        assert_eq!(moved.position, 0);
        Ok(())
    }

    #[test]
    fn test_set_status_appends_and_is_noop_for_same_status() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let a = test_support::task(&db, &project, &ada, "a");
        test_support::task_in(&db, &project, &ada, "r1", TaskStatus::InReview);

        let same = db.set_task_status(a.id, TaskStatus::Todo)?.expect("task exists");
        assert_eq!(same.position, 0);

        let moved = db.set_task_status(a.id, TaskStatus::InReview)?.expect("task exists");
        assert_eq!(moved.status, TaskStatus::InReview);
        assert_eq!(moved.position, 1);
        Ok(())
    }

    #[test]
    fn test_move_missing_task_is_none() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let a = test_support::task(&db, &project, &ada, "a");
        db.delete_task(a.id)?;

        assert!(db.move_task(a.id, TaskStatus::Done, 0)?.is_none());
        assert!(db.set_task_status(a.id, TaskStatus::Done)?.is_none());
        Ok(())
    }

    #[test]
    fn test_delete_task_closes_gap() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        let a = test_support::task(&db, &project, &ada, "a");
        test_support::task(&db, &project, &ada, "b");
        db.create_comment(a.id, ada.id, "note")?;

        assert!(db.delete_task(a.id)?);
        assert!(!db.delete_task(a.id)?);
        assert_eq!(positions(&db, project.id, TaskStatus::Todo), vec![("b".into(), 0)]);
        Ok(())
    }

    #[test]
    fn test_get_board_view() -> Result<()> {
        let db = Database::new_in_memory()?;
        let ada = test_support::user(&db, "ada@example.com");
        let project = test_support::project(&db, &ada, "alpha");
        test_support::task(&db, &project, &ada, "a");
        test_support::task_in(&db, &project, &ada, "d", TaskStatus::Done);

        let board = db.get_board(project.id)?;
        assert_eq!(board.project.id, project.id);
        let statuses: Vec<TaskStatus> = board.columns.iter().map(|c| c.status).collect();
        assert_eq!(statuses, TaskStatus::ALL.to_vec());
        assert_eq!(board.columns[0].tasks.len(), 1);
        assert_eq!(board.columns[1].tasks.len(), 0);
        assert_eq!(board.columns[3].tasks[0].title, "d");
        Ok(())
    }
}
