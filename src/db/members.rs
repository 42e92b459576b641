use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use super::Database;
use crate::models::{ProjectMember, ProjectRole};

/// Intermediate row struct for project_members joined with users.
struct MemberRow {
    project_id: i64,
    user_id: i64,
    name: String,
    email: String,
    role: String,
    joined_at: String,
}

impl MemberRow {
    fn into_member(self) -> Result<ProjectMember> {
        let role = ProjectRole::from_str(&self.role)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse member role")?;
        Ok(ProjectMember {
            project_id: self.project_id,
            user_id: self.user_id,
            name: self.name,
            email: self.email,
            role,
            joined_at: self.joined_at,
        })
    }
}

const MEMBER_SELECT: &str = "SELECT m.project_id, m.user_id, u.name, u.email, m.role, m.joined_at
     FROM project_members m JOIN users u ON u.id = m.user_id";

impl Database {
    // ── Membership ────────────────────────────────────────────────────

    pub fn get_member_role(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query member role")?;
        role.map(|r| {
            ProjectRole::from_str(&r)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse member role")
        })
        .transpose()
    }

    pub fn get_member(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectMember>> {
        let row = self
            .conn
            .query_row(
                &format!("{MEMBER_SELECT} WHERE m.project_id = ?1 AND m.user_id = ?2"),
                params![project_id, user_id],
                |row| {
                    Ok(MemberRow {
                        project_id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        email: row.get(3)?,
                        role: row.get(4)?,
                        joined_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("Failed to query member")?;
        row.map(MemberRow::into_member).transpose()
    }

    pub fn add_member(
        &self,
        project_id: i64,
        user_id: i64,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        self.conn
            .execute(
                "INSERT INTO project_members (project_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![project_id, user_id, role.as_str()],
            )
            .context("Failed to insert member")?;
        self.get_member(project_id, user_id)?
            .context("Member not found after insert")
    }

    pub fn list_members(&self, project_id: i64) -> Result<Vec<ProjectMember>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{MEMBER_SELECT} WHERE m.project_id = ?1 ORDER BY m.joined_at, m.user_id"
            ))
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(MemberRow {
                    project_id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                    role: row.get(4)?,
                    joined_at: row.get(5)?,
                })
            })
            .context("Failed to query members")?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row.context("Failed to read member row")?.into_member()?);
        }
        Ok(members)
    }

    pub fn update_member_role(
        &self,
        project_id: i64,
        user_id: i64,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        self.conn
            .execute(
                "UPDATE project_members SET role = ?1 WHERE project_id = ?2 AND user_id = ?3",
                params![role.as_str(), project_id, user_id],
            )
            .context("Failed to update member role")?;
        self.get_member(project_id, user_id)?
            .context("Member not found after role update")
    }

    /// Remove a member and unassign their tasks in the project.
    pub fn remove_member(&self, project_id: i64, user_id: i64) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE tasks SET assignee_id = NULL, updated_at = datetime('now')
             WHERE project_id = ?1 AND assignee_id = ?2",
            params![project_id, user_id],
        )
        .context("Failed to unassign tasks")?;
        let count = tx
            .execute(
                "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
            )
            .context("Failed to delete member")?;
        tx.commit().context("Failed to commit member removal")?;
        Ok(count > 0)
    }

    pub fn count_owners(&self, project_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM project_members WHERE project_id = ?1 AND role = 'OWNER'",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count owners")
    }

    pub fn member_project_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT project_id FROM project_members WHERE user_id = ?1")
            .context("Failed to prepare member_project_ids")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("Failed to query member projects")?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read project id")?;
        Ok(ids)
    }
}
