use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;

use super::tasks::status_change_notices;
use super::{SharedState, ensure, notify, ok, parse_field, require, task_access};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::models::TaskStatus;
use crate::permissions::Permission;
use crate::ws::{self, Event};

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub status: String,
    pub position: i32,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/{project_id}", get(get_board))
        .route("/tasks/{task_id}/move", patch(move_task))
}

async fn get_board(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, project_id, caller.id(), Permission::ViewProject).await?;
    let board = state
        .db
        .call(move |db| db.get_board(project_id))
        .await?;
    Ok(ok(board))
}

async fn move_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(task_id): Path<i64>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (before, role) = task_access(&state, task_id, caller.id()).await?;
    ensure(role, Permission::EditTask)?;
    let status = parse_field::<TaskStatus>(&req.status)?;

    let task = state
        .db
        .call(move |db| db.move_task(task_id, status, req.position))
        .await?
        .ok_or_else(|| ApiError::not_found("Task", task_id))?;

    tracing::debug!(
        task_id,
        from = %before.status,
        to = %task.status,
        position = task.position,
        "moved task"
    );
    ws::publish(
        &state.events,
        Event::TaskMoved {
            project_id: task.project_id,
            task_id,
            from_status: before.status,
            to_status: task.status,
            position: task.position,
        },
    );
    if before.status != task.status {
        notify(&state, status_change_notices(&task, before.status, &caller)).await;
    }
    Ok(ok(task))
}
