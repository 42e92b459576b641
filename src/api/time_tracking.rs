use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{PageParams, SharedState, created, ensure, ok, task_access};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::permissions::Permission;
use crate::ws::{self, Event};

/// SQLite `datetime()` layout, which all stored timestamps share.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Deserialize)]
pub struct StartTimerRequest {
    pub task_id: i64,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct ManualEntryRequest {
    pub task_id: i64,
    pub started_at: String,
    pub ended_at: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct EntryQuery {
    pub task_id: Option<i64>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_entries))
        .route("/start", post(start_timer))
        .route("/stop", post(stop_timer))
        .route("/active", get(active_timer))
        .route("/manual", post(manual_entry))
        .route("/{id}", delete(delete_entry))
        .route("/task/{task_id}/summary", get(task_summary))
}

fn parse_instant(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("{} must be an RFC 3339 timestamp", field)))
}

async fn start_timer(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<StartTimerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (task, role) = task_access(&state, req.task_id, caller.id()).await?;
    ensure(role, Permission::TrackTime)?;

    let user_id = caller.id();
    let description = req.description.unwrap_or_default();
    let entry = state
        .db
        .call(move |db| {
            if db.get_running_entry(user_id)?.is_some() {
                return Ok(None);
            }
            db.start_timer(task.id, user_id, &description).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::Conflict("A timer is already running".into()))?;

    tracing::debug!(user_id, task_id = task.id, "timer started");
    ws::publish(
        &state.events,
        Event::TimerStarted {
            project_id: task.project_id,
            entry: entry.clone(),
        },
    );
    Ok(created(entry))
}

async fn stop_timer(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let (entry, task) = state
        .db
        .call(move |db| {
            let Some(entry) = db.stop_timer(user_id)? else {
                return Ok((None, None));
            };
            let task = db.get_task(entry.task_id)?;
            Ok((Some(entry), task))
        })
        .await?;
    let entry = entry.ok_or_else(|| ApiError::NotFound("No timer is running".into()))?;

    tracing::debug!(user_id, duration = ?entry.duration_seconds, "timer stopped");
    if let Some(task) = task {
        ws::publish(
            &state.events,
            Event::TimerStopped {
                project_id: task.project_id,
                entry: entry.clone(),
            },
        );
    }
    Ok(ok(entry))
}

async fn active_timer(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let entry = state
        .db
        .call(move |db| db.get_running_entry(user_id))
        .await?;
    Ok(ok(entry))
}

async fn list_entries(
    State(state): State<SharedState>,
    caller: AuthUser,
    Query(query): Query<EntryQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let (limit, offset) = (page.limit(), page.offset());
    let entries = state
        .db
        .call(move |db| db.list_time_entries(user_id, query.task_id, limit, offset))
        .await?;
    Ok(page.respond(entries))
}

async fn manual_entry(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<ManualEntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (task, role) = task_access(&state, req.task_id, caller.id()).await?;
    ensure(role, Permission::TrackTime)?;

    let started = parse_instant("started_at", &req.started_at)?;
    let ended = parse_instant("ended_at", &req.ended_at)?;
    if ended <= started {
        return Err(ApiError::BadRequest(
            "ended_at must be after started_at".into(),
        ));
    }

    let user_id = caller.id();
    let description = req.description.unwrap_or_default();
    let (started, ended) = (
        started.format(SQLITE_DATETIME).to_string(),
        ended.format(SQLITE_DATETIME).to_string(),
    );
    let entry = state
        .db
        .call(move |db| db.create_manual_entry(task.id, user_id, &description, &started, &ended))
        .await?;
    ws::publish(
        &state.events,
        Event::TimeEntryCreated {
            project_id: task.project_id,
            entry: entry.clone(),
        },
    );
    Ok(created(entry))
}

async fn delete_entry(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let (entry, task) = state
        .db
        .call(move |db| {
            let Some(entry) = db.delete_time_entry(id, user_id)? else {
                return Ok(None);
            };
            let task = db.get_task(entry.task_id)?;
            Ok(Some((entry, task)))
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Time entry", id))?;
    if let Some(task) = task {
        ws::publish(
            &state.events,
            Event::TimeEntryDeleted {
                project_id: task.project_id,
                task_id: task.id,
                entry_id: entry.id,
            },
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn task_summary(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, role) = task_access(&state, task_id, caller.id()).await?;
    ensure(role, Permission::ViewProject)?;
    let summary = state
        .db
        .call(move |db| db.task_time_summary(task_id))
        .await?;
    Ok(ok(summary))
}
