use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch},
};
use serde::Deserialize;
use serde_json::json;

use super::{PageParams, SharedState, ok};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::ws::{self, Event};

#[derive(Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", patch(mark_all_read))
        .route("/{id}/read", patch(mark_read))
        .route("/{id}", delete(delete_notification))
}

async fn list_notifications(
    State(state): State<SharedState>,
    caller: AuthUser,
    Query(query): Query<NotificationQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let (limit, offset) = (page.limit(), page.offset());
    let notifications = state
        .db
        .call(move |db| db.list_notifications(user_id, query.unread_only, limit, offset))
        .await?;
    Ok(page.respond(notifications))
}

async fn unread_count(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let count = state
        .db
        .call(move |db| db.unread_notification_count(user_id))
        .await?;
    Ok(ok(json!({ "count": count })))
}

async fn mark_read(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let found = state
        .db
        .call(move |db| db.mark_notification_read(id, user_id))
        .await?;
    if !found {
        return Err(ApiError::not_found("Notification", id));
    }
    ws::publish(
        &state.events,
        Event::NotificationsRead {
            user_id,
            notification_id: Some(id),
        },
    );
    Ok(ok(json!({ "updated": 1 })))
}

async fn mark_all_read(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let updated = state
        .db
        .call(move |db| db.mark_all_notifications_read(user_id))
        .await?;
    ws::publish(
        &state.events,
        Event::NotificationsRead {
            user_id,
            notification_id: None,
        },
    );
    Ok(ok(json!({ "updated": updated })))
}

async fn delete_notification(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let deleted = state
        .db
        .call(move |db| db.delete_notification(id, user_id))
        .await?;
    if !deleted {
        return Err(ApiError::not_found("Notification", id));
    }
    ws::publish(
        &state.events,
        Event::NotificationDeleted {
            user_id,
            notification_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}
