use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Paged};
use crate::models::{Project, ProjectRole, ProjectStats, ProjectWithRole, StatusCount, TaskStatus};

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Database {
    // ── Project CRUD ──────────────────────────────────────────────────

    /// Create a project and enrol its creator as `OWNER`.
    pub fn create_project(&self, name: &str, description: &str, owner_id: i64) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO projects (name, description, owner_id) VALUES (?1, ?2, ?3)",
            params![name.trim(), description, owner_id],
        )
        .context("Failed to insert project")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO project_members (project_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![id, owner_id, ProjectRole::Owner.as_str()],
        )
        .context("Failed to insert owner membership")?;
        tx.commit().context("Failed to commit project creation")?;
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, description, owner_id, created_at, updated_at
                 FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()
            .context("Failed to query project")
    }

    pub fn update_project(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(n) = name {
            tx.execute(
                "UPDATE projects SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![n.trim(), id],
            )
            .context("Failed to update project name")?;
        }
        if let Some(d) = description {
            tx.execute(
                "UPDATE projects SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![d, id],
            )
            .context("Failed to update project description")?;
        }
        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)?
            .context("Project not found after update")
    }

    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    /// Projects the user is a member of, most recently created first.
    pub fn list_projects_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Paged<ProjectWithRole>> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM project_members WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count projects")?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.name, p.description, p.owner_id, p.created_at, p.updated_at, m.role
                 FROM projects p JOIN project_members m ON m.project_id = p.id
                 WHERE m.user_id = ?1
                 ORDER BY p.id DESC LIMIT ?2 OFFSET ?3",
            )
            .context("Failed to prepare list_projects_for_user")?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], |row| {
                Ok((project_from_row(row)?, row.get::<_, String>(6)?))
            })
            .context("Failed to query projects")?;
        let mut items = Vec::new();
        for row in rows {
            let (project, role) = row.context("Failed to read project row")?;
            let role = ProjectRole::from_str(&role)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse member role")?;
            items.push(ProjectWithRole { project, role });
        }
        Ok(Paged { items, total })
    }

    pub fn project_stats(&self, project_id: i64) -> Result<ProjectStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM tasks WHERE project_id = ?1 GROUP BY status")
            .context("Failed to prepare project_stats")?;
        let counted = stmt
            .query_map(params![project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query task counts")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read task count row")?;

        let by_status: Vec<StatusCount> = TaskStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: counted
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map(|(_, c)| *c)
                    .unwrap_or(0),
            })
            .collect();
        let total_tasks: i64 = by_status.iter().map(|s| s.count).sum();
        let done = by_status
            .iter()
            .find(|s| s.status == TaskStatus::Done)
            .map(|s| s.count)
            .unwrap_or(0);
        let completion_percent = if total_tasks == 0 {
            0.0
        } else {
            (done as f64 * 1000.0 / total_tasks as f64).round() / 10.0
        };

        let tracked_seconds: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(e.duration_seconds), 0)
                 FROM time_entries e JOIN tasks t ON t.id = e.task_id
                 WHERE t.project_id = ?1 AND e.ended_at IS NOT NULL",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to sum tracked time")?;

        Ok(ProjectStats {
            project_id,
            total_tasks,
            by_status,
            completion_percent,
            tracked_seconds,
        })
    }
}
