use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::tasks::task_watchers;
use super::{PageParams, SharedState, created, ensure, notify, ok, require_non_empty, task_access};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::models::{Comment, NewNotification, NotificationKind, ProjectRole, Task};
use crate::permissions::Permission;
use crate::ws::{self, Event};

#[derive(Deserialize)]
pub struct CommentQuery {
    pub task_id: i64,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub task_id: i64,
    pub content: String,
}

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_comments).post(create_comment))
        .route("/{id}", put(update_comment).delete(delete_comment))
}

/// Load a comment with its task and the caller's role in the task's project.
async fn comment_access(
    state: &SharedState,
    id: i64,
    user_id: i64,
) -> Result<(Comment, Task, ProjectRole), ApiError> {
    let comment = state
        .db
        .call(move |db| db.get_comment(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Comment", id))?;
    let (task, role) = task_access(state, comment.task_id, user_id).await?;
    Ok((comment, task, role))
}

async fn list_comments(
    State(state): State<SharedState>,
    caller: AuthUser,
    Query(query): Query<CommentQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, role) = task_access(&state, query.task_id, caller.id()).await?;
    ensure(role, Permission::ViewProject)?;
    let (limit, offset) = (page.limit(), page.offset());
    let comments = state
        .db
        .call(move |db| db.list_comments(query.task_id, limit, offset))
        .await?;
    Ok(page.respond(comments))
}

async fn create_comment(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (task, role) = task_access(&state, req.task_id, caller.id()).await?;
    ensure(role, Permission::Comment)?;
    require_non_empty(&req.content, "content")?;

    let author_id = caller.id();
    let comment = state
        .db
        .call(move |db| db.create_comment(req.task_id, author_id, req.content.trim()))
        .await?;

    ws::publish(
        &state.events,
        Event::CommentAdded {
            project_id: task.project_id,
            comment: comment.clone(),
        },
    );
    let notes = task_watchers(&task, author_id)
        .into_iter()
        .map(|user_id| NewNotification {
            user_id,
            kind: NotificationKind::CommentAdded,
            title: format!("New comment on {}", task.title),
            message: format!("{} commented on \"{}\"", caller.user.name, task.title),
            project_id: Some(task.project_id),
            task_id: Some(task.id),
        })
        .collect();
    notify(&state, notes).await;
    Ok(created(comment))
}

async fn update_comment(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (comment, task, _) = comment_access(&state, id, caller.id()).await?;
    if comment.author_id != caller.id() {
        return Err(ApiError::Forbidden(
            "Only the author can edit a comment".into(),
        ));
    }
    require_non_empty(&req.content, "content")?;

    let comment = state
        .db
        .call(move |db| db.update_comment(id, req.content.trim()))
        .await?;
    ws::publish(
        &state.events,
        Event::CommentUpdated {
            project_id: task.project_id,
            comment: comment.clone(),
        },
    );
    Ok(ok(comment))
}

async fn delete_comment(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (comment, task, role) = comment_access(&state, id, caller.id()).await?;
    if comment.author_id != caller.id() {
        ensure(role, Permission::ManageMembers)?;
    }
    state.db.call(move |db| db.delete_comment(id)).await?;
    ws::publish(
        &state.events,
        Event::CommentDeleted {
            project_id: task.project_id,
            task_id: task.id,
            comment_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}
