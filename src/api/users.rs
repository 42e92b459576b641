use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::{PageParams, SharedState, double_option, ok, require_non_empty};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::ws::{self, Event};

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub avatar_url: Option<Option<String>>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(search_users))
        .route("/me", put(update_me))
        .route("/{id}", get(get_user))
}

async fn search_users(
    State(state): State<SharedState>,
    _caller: AuthUser,
    Query(search): Query<SearchQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = (page.limit(), page.offset());
    let users = state
        .db
        .call(move |db| db.search_users(search.q.as_deref(), limit, offset))
        .await?;
    Ok(page.respond(users))
}

async fn get_user(
    State(state): State<SharedState>,
    _caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| db.get_user(id))
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;
    Ok(ok(user))
}

async fn update_me(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &req.name {
        require_non_empty(name, "name")?;
    }
    let user_id = caller.id();
    let user = state
        .db
        .call(move |db| {
            db.update_user(
                user_id,
                req.name.as_deref(),
                req.avatar_url.as_ref().map(|a| a.as_deref()),
            )
        })
        .await?;
    ws::publish(&state.events, Event::ProfileUpdated { user: user.clone() });
    Ok(ok(user))
}
