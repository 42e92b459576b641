use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub owner_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A project as seen by one of its members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectWithRole {
    #[serde(flatten)]
    pub project: Project,
    pub role: ProjectRole,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl ProjectRole {
    pub const ALL: [ProjectRole; 4] = [Self::Owner, Self::Admin, Self::Member, Self::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
            Self::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OWNER" => Ok(Self::Owner),
            "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            "VIEWER" => Ok(Self::Viewer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub project_id: i64,
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub role: ProjectRole,
    pub joined_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    /// Kanban column order.
    pub const ALL: [TaskStatus; 4] = [Self::Todo, Self::InProgress, Self::InReview, Self::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::InReview => "IN_REVIEW",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "IN_REVIEW" => Ok(Self::InReview),
            "DONE" => Ok(Self::Done),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    Task,
    Bug,
    Feature,
    Improvement,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "TASK",
            Self::Bug => "BUG",
            Self::Feature => "FEATURE",
            Self::Improvement => "IMPROVEMENT",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TASK" => Ok(Self::Task),
            "BUG" => Ok(Self::Bug),
            "FEATURE" => Ok(Self::Feature),
            "IMPROVEMENT" => Ok(Self::Improvement),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub task_type: TaskType,
    pub assignee_id: Option<i64>,
    pub reporter_id: i64,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub position: i32,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating a task. Validation happens at the API edge.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub task_type: TaskType,
    pub assignee_id: Option<i64>,
    pub reporter_id: i64,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
}

/// Partial update of a task. `None` leaves a field untouched; the nested
/// `Option`s distinguish "clear" from "leave alone".
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub task_type: Option<TaskType>,
    pub due_date: Option<Option<String>>,
    pub estimated_hours: Option<Option<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub task_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    TaskAssigned,
    TaskStatusChanged,
    CommentAdded,
    ProjectMemberAdded,
    ProjectRoleChanged,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssigned => "TASK_ASSIGNED",
            Self::TaskStatusChanged => "TASK_STATUS_CHANGED",
            Self::CommentAdded => "COMMENT_ADDED",
            Self::ProjectMemberAdded => "PROJECT_MEMBER_ADDED",
            Self::ProjectRoleChanged => "PROJECT_ROLE_CHANGED",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TASK_ASSIGNED" => Ok(Self::TaskAssigned),
            "TASK_STATUS_CHANGED" => Ok(Self::TaskStatusChanged),
            "COMMENT_ADDED" => Ok(Self::CommentAdded),
            "PROJECT_MEMBER_ADDED" => Ok(Self::ProjectMemberAdded),
            "PROJECT_ROLE_CHANGED" => Ok(Self::ProjectRoleChanged),
            _ => Err(format!("Invalid notification kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub description: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_seconds: Option<i64>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTime {
    pub user_id: i64,
    pub name: String,
    pub total_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSummary {
    pub task_id: i64,
    pub total_seconds: i64,
    pub by_user: Vec<UserTime>,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub project: Project,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: TaskStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub project_id: i64,
    pub total_tasks: i64,
    pub by_status: Vec<StatusCount>,
    pub completion_percent: f64,
    pub tracked_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(TaskStatus::from_str("in_progress").unwrap(), TaskStatus::InProgress);
        assert!(TaskStatus::from_str("BLOCKED").is_err());
    }

    #[test]
    fn test_enums_serialize_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::InReview).unwrap(), "\"IN_REVIEW\"");
        assert_eq!(serde_json::to_string(&ProjectRole::Viewer).unwrap(), "\"VIEWER\"");
        assert_eq!(
            serde_json::to_string(&NotificationKind::CommentAdded).unwrap(),
            "\"COMMENT_ADDED\""
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
        assert_eq!(TaskType::default(), TaskType::Task);
    }

    #[test]
    fn test_project_with_role_flattens() {
        let pwr = ProjectWithRole {
            project: Project {
                id: 7,
                name: "Apollo".into(),
                description: String::new(),
                owner_id: 1,
                created_at: "2024-01-01 00:00:00".into(),
                updated_at: "2024-01-01 00:00:00".into(),
            },
            role: ProjectRole::Admin,
        };
        let v = serde_json::to_value(&pwr).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["role"], "ADMIN");
    }
}
