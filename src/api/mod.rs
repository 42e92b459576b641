//! JSON REST API.
//!
//! Each route group lives in its own module and contributes a `router()`
//! that `api_router` nests under `/api/<group>`. Handlers share
//! [`AppState`], authenticate with the [`AuthUser`](crate::auth::AuthUser)
//! extractor, and answer with the envelopes defined here.

mod auth;
mod comments;
mod kanban;
mod notifications;
mod projects;
mod roles;
mod tasks;
mod time_tracking;
mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{StatusCode, Uri},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::AuthConfig;
use crate::db::{DbHandle, Paged};
use crate::errors::ApiError;
use crate::models::{NewNotification, ProjectRole, Task};
use crate::permissions::Permission;
use crate::ws::{self, Event};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub events: broadcast::Sender<Event>,
    pub auth: AuthConfig,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, auth: AuthConfig) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self { db, events, auth }
    }
}

// ── Response envelopes ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        message: None,
    })
}

pub fn ok_with_message<T: Serialize>(data: T, message: &str) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        message: Some(message.to_string()),
    })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct PagedResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: PageMeta,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?page=&limit=` query parameters shared by every listing.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageParams {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        crate::db::offset_for(self.page(), self.limit())
    }

    pub fn respond<T: Serialize>(&self, paged: Paged<T>) -> Json<PagedResponse<T>> {
        let limit = self.limit();
        Json(PagedResponse {
            success: true,
            data: paged.items,
            pagination: PageMeta {
                page: self.page(),
                limit,
                total: paged.total,
                total_pages: (paged.total + limit - 1) / limit,
            },
        })
    }
}

// ── Access checks ─────────────────────────────────────────────────────

/// The caller's role in a project: 404 when the project does not exist,
/// 403 when the caller is not a member.
pub(crate) async fn project_role(
    state: &SharedState,
    project_id: i64,
    user_id: i64,
) -> Result<ProjectRole, ApiError> {
    let (exists, role) = state
        .db
        .call(move |db| {
            Ok((
                db.get_project(project_id)?.is_some(),
                db.get_member_role(project_id, user_id)?,
            ))
        })
        .await?;
    if !exists {
        return Err(ApiError::not_found("Project", project_id));
    }
    role.ok_or_else(|| ApiError::Forbidden("You are not a member of this project".into()))
}

pub(crate) fn ensure(role: ProjectRole, permission: Permission) -> Result<(), ApiError> {
    if role.can(permission) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Role {} lacks permission {}",
            role,
            permission.as_str()
        )))
    }
}

/// Resolve the caller's role and require `permission` in one step.
pub(crate) async fn require(
    state: &SharedState,
    project_id: i64,
    user_id: i64,
    permission: Permission,
) -> Result<ProjectRole, ApiError> {
    let role = project_role(state, project_id, user_id).await?;
    ensure(role, permission)?;
    Ok(role)
}

/// Load a task and the caller's role in its project.
pub(crate) async fn task_access(
    state: &SharedState,
    task_id: i64,
    user_id: i64,
) -> Result<(Task, ProjectRole), ApiError> {
    let (task, role) = state
        .db
        .call(move |db| {
            let Some(task) = db.get_task(task_id)? else {
                return Ok((None, None));
            };
            let role = db.get_member_role(task.project_id, user_id)?;
            Ok((Some(task), role))
        })
        .await?;
    let task = task.ok_or_else(|| ApiError::not_found("Task", task_id))?;
    let role =
        role.ok_or_else(|| ApiError::Forbidden("You are not a member of this project".into()))?;
    Ok((task, role))
}

/// Persist notifications and push them to connected clients. Failures are
/// logged; the mutation that triggered them has already succeeded.
pub(crate) async fn notify(state: &SharedState, notes: Vec<NewNotification>) {
    if notes.is_empty() {
        return;
    }
    let result = state
        .db
        .call(move |db| {
            notes
                .iter()
                .map(|n| db.create_notification(n))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await;
    match result {
        Ok(created) => {
            for notification in created {
                ws::publish(&state.events, Event::NotificationCreated { notification });
            }
        }
        Err(e) => tracing::warn!(error = ?e, "failed to create notifications"),
    }
}

/// Deserialize a field that distinguishes "absent" (`None`) from an explicit
/// `null` (`Some(None)`). Pair with `#[serde(default)]`.
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Parse an enum value from a request, mapping the error to 400.
pub(crate) fn parse_field<T>(value: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(ApiError::BadRequest)
}

pub(crate) fn require_non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::BadRequest(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    let api = Router::new()
        .nest("/auth", auth::router())
        .nest("/users", users::router())
        .nest("/projects", projects::router())
        .nest("/tasks", tasks::router())
        .nest("/comments", comments::router())
        .nest("/notifications", notifications::router())
        .nest("/time-tracking", time_tracking::router())
        .nest("/kanban", kanban::router())
        .nest("/roles", roles::router())
        .fallback(api_not_found);

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn api_not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
