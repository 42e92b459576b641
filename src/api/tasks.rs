use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::{
    PageParams, SharedState, created, double_option, ensure, notify, ok, parse_field,
    project_role, require, require_non_empty, task_access,
};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::models::{
    NewNotification, NewTask, NotificationKind, Task, TaskChanges, TaskFilter, TaskPriority,
    TaskStatus, TaskType,
};
use crate::permissions::Permission;
use crate::ws::{self, Event};

#[derive(Deserialize)]
pub struct TaskQuery {
    pub project_id: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee_id: Option<i64>,
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub task_type: Option<String>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub task_type: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_hours: Option<Option<f64>>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub assignee_id: Option<i64>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/{id}", get(get_task).put(update_task).delete(delete_task))
        .route("/{id}/status", patch(change_status))
        .route("/{id}/assign", patch(assign_task))
}

fn validate_due_date(value: &str) -> Result<(), ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ApiError::BadRequest(format!("Invalid due_date '{}', expected YYYY-MM-DD", value)))
}

fn validate_estimate(hours: f64) -> Result<(), ApiError> {
    if hours.is_finite() && hours >= 0.0 {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "estimated_hours must be a non-negative number".into(),
        ))
    }
}

/// Reject assignees that are not members of the project.
async fn check_assignee(state: &SharedState, project_id: i64, assignee_id: i64) -> Result<(), ApiError> {
    let role = state
        .db
        .call(move |db| db.get_member_role(project_id, assignee_id))
        .await?;
    if role.is_none() {
        return Err(ApiError::BadRequest(format!(
            "User {} is not a member of this project",
            assignee_id
        )));
    }
    Ok(())
}

/// Notification for a newly assigned user, unless they assigned themselves.
fn assignment_notice(task: &Task, actor: &AuthUser) -> Option<NewNotification> {
    let assignee = task.assignee_id?;
    (assignee != actor.id()).then(|| NewNotification {
        user_id: assignee,
        kind: NotificationKind::TaskAssigned,
        title: format!("Assigned: {}", task.title),
        message: format!("{} assigned you to \"{}\"", actor.user.name, task.title),
        project_id: Some(task.project_id),
        task_id: Some(task.id),
    })
}

/// Reporter and assignee of a task, minus `actor`, without duplicates.
pub(crate) fn task_watchers(task: &Task, actor: i64) -> Vec<i64> {
    let mut ids = vec![task.reporter_id];
    if let Some(assignee) = task.assignee_id {
        if assignee != task.reporter_id {
            ids.push(assignee);
        }
    }
    ids.retain(|id| *id != actor);
    ids
}

/// Notices for a status change, sent to the task's watchers except the actor.
pub(crate) fn status_change_notices(
    task: &Task,
    from: TaskStatus,
    actor: &AuthUser,
) -> Vec<NewNotification> {
    task_watchers(task, actor.id())
        .into_iter()
        .map(|user_id| NewNotification {
            user_id,
            kind: NotificationKind::TaskStatusChanged,
            title: format!("{} is now {}", task.title, task.status),
            message: format!(
                "{} moved \"{}\" from {} to {}",
                actor.user.name, task.title, from, task.status
            ),
            project_id: Some(task.project_id),
            task_id: Some(task.id),
        })
        .collect()
}

async fn list_tasks(
    State(state): State<SharedState>,
    caller: AuthUser,
    Query(query): Query<TaskQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    if let Some(project_id) = query.project_id {
        project_role(&state, project_id, user_id).await?;
    }
    let filter = TaskFilter {
        project_id: query.project_id,
        status: query.status.as_deref().map(parse_field::<TaskStatus>).transpose()?,
        priority: query.priority.as_deref().map(parse_field::<TaskPriority>).transpose()?,
        assignee_id: query.assignee_id,
        search: query.q,
    };
    let (limit, offset) = (page.limit(), page.offset());
    let tasks = state
        .db
        .call(move |db| db.list_tasks(user_id, &filter, limit, offset))
        .await?;
    Ok(page.respond(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, req.project_id, caller.id(), Permission::CreateTask).await?;
    require_non_empty(&req.title, "title")?;
    if let Some(due) = &req.due_date {
        validate_due_date(due)?;
    }
    if let Some(hours) = req.estimated_hours {
        validate_estimate(hours)?;
    }
    if let Some(assignee) = req.assignee_id {
        check_assignee(&state, req.project_id, assignee).await?;
    }

    let new = NewTask {
        project_id: req.project_id,
        title: req.title.trim().to_string(),
        description: req.description.unwrap_or_default(),
        status: req.status.as_deref().map(parse_field).transpose()?.unwrap_or(TaskStatus::Todo),
        priority: req.priority.as_deref().map(parse_field).transpose()?.unwrap_or_default(),
        task_type: req.task_type.as_deref().map(parse_field::<TaskType>).transpose()?.unwrap_or_default(),
        assignee_id: req.assignee_id,
        reporter_id: caller.id(),
        due_date: req.due_date,
        estimated_hours: req.estimated_hours,
    };
    let task = state.db.call(move |db| db.create_task(&new)).await?;

    tracing::info!(task_id = task.id, project_id = task.project_id, "created task");
    ws::publish(&state.events, Event::TaskCreated { task: task.clone() });
    if let Some(notice) = assignment_notice(&task, &caller) {
        notify(&state, vec![notice]).await;
    }
    Ok(created(task))
}

async fn get_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (task, role) = task_access(&state, id, caller.id()).await?;
    ensure(role, Permission::ViewProject)?;
    Ok(ok(task))
}

async fn update_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, role) = task_access(&state, id, caller.id()).await?;
    ensure(role, Permission::EditTask)?;

    if let Some(title) = &req.title {
        require_non_empty(title, "title")?;
    }
    if let Some(Some(due)) = &req.due_date {
        validate_due_date(due)?;
    }
    if let Some(Some(hours)) = req.estimated_hours {
        validate_estimate(hours)?;
    }
    let changes = TaskChanges {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description,
        priority: req.priority.as_deref().map(parse_field).transpose()?,
        task_type: req.task_type.as_deref().map(parse_field).transpose()?,
        due_date: req.due_date,
        estimated_hours: req.estimated_hours,
    };
    let task = state.db.call(move |db| db.update_task(id, &changes)).await?;
    ws::publish(&state.events, Event::TaskUpdated { task: task.clone() });
    Ok(ok(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (task, role) = task_access(&state, id, caller.id()).await?;
    if task.reporter_id != caller.id() {
        ensure(role, Permission::DeleteTask)?;
    }
    let deleted = state.db.call(move |db| db.delete_task(id)).await?;
    if !deleted {
        return Err(ApiError::not_found("Task", id));
    }
    tracing::info!(task_id = id, project_id = task.project_id, "deleted task");
    ws::publish(
        &state.events,
        Event::TaskDeleted {
            project_id: task.project_id,
            task_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn change_status(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (before, role) = task_access(&state, id, caller.id()).await?;
    ensure(role, Permission::EditTask)?;
    let status = parse_field::<TaskStatus>(&req.status)?;
    if before.status == status {
        return Ok(ok(before));
    }

    let task = state
        .db
        .call(move |db| db.set_task_status(id, status))
        .await?
        .ok_or_else(|| ApiError::not_found("Task", id))?;
    ws::publish(
        &state.events,
        Event::TaskMoved {
            project_id: task.project_id,
            task_id: task.id,
            from_status: before.status,
            to_status: task.status,
            position: task.position,
        },
    );
    notify(&state, status_change_notices(&task, before.status, &caller)).await;
    Ok(ok(task))
}

async fn assign_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (before, role) = task_access(&state, id, caller.id()).await?;
    ensure(role, Permission::EditTask)?;
    if let Some(assignee) = req.assignee_id {
        check_assignee(&state, before.project_id, assignee).await?;
    }

    let task = state
        .db
        .call(move |db| db.assign_task(id, req.assignee_id))
        .await?;
    ws::publish(&state.events, Event::TaskUpdated { task: task.clone() });
    if task.assignee_id != before.assignee_id {
        if let Some(notice) = assignment_notice(&task, &caller) {
            notify(&state, vec![notice]).await;
        }
    }
    Ok(ok(task))
}
