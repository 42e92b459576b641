use axum::{
    Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;

use super::{SharedState, ok, project_role};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::models::ProjectRole;
use crate::permissions::{self, Permission};

#[derive(Serialize)]
pub struct MyRole {
    pub project_id: i64,
    pub role: ProjectRole,
    pub permissions: Vec<Permission>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_roles))
        .route("/project/{project_id}", get(my_project_role))
}

async fn list_roles(_caller: AuthUser) -> impl IntoResponse {
    ok(permissions::role_table())
}

async fn my_project_role(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let role = project_role(&state, project_id, caller.id()).await?;
    Ok(ok(MyRole {
        project_id,
        role,
        permissions: role.permissions(),
    }))
}
