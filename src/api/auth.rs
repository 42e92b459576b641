use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{SharedState, created, ok, ok_with_message, require_non_empty};
use crate::auth::{self, AuthUser};
use crate::errors::ApiError;
use crate::models::User;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct AuthPayload {
    pub user: User,
    pub token: String,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/password", put(change_password))
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_off_thread(password: String) -> Result<String, ApiError> {
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| anyhow::anyhow!("password hashing task failed: {}", e))??;
    Ok(hash)
}

async fn verify_off_thread(password: String, stored: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || auth::verify_password(&password, &stored))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password check task failed: {}", e)))
}

/// Create a session for `user_id` and return the raw token.
async fn issue_token(state: &SharedState, user_id: i64) -> Result<String, ApiError> {
    let token = auth::generate_token();
    let token_hash = auth::hash_token(&token);
    let ttl = state.auth.token_ttl_hours;
    state
        .db
        .call(move |db| db.create_session(user_id, &token_hash, ttl))
        .await?;
    Ok(token)
}

async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth::validate_email(&req.email)?;
    require_non_empty(&req.name, "name")?;
    auth::validate_password(&req.password, state.auth.min_password_length)?;

    let email = req.email.trim().to_lowercase();
    let lookup = email.clone();
    if state
        .db
        .call(move |db| db.find_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "A user with email {} already exists",
            email
        )));
    }

    let hash = hash_off_thread(req.password).await?;
    let name = req.name;
    let insert_email = email.clone();
    let user = state
        .db
        .call(move |db| db.create_user(&insert_email, &name, &hash))
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!("A user with email {} already exists", email))
        })?;
    let token = issue_token(&state, user.id).await?;
    tracing::info!(user_id = user.id, "registered user");
    Ok(created(AuthPayload { user, token }))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());
    let email = req.email.trim().to_lowercase();
    let creds = state
        .db
        .call(move |db| db.get_credentials(&email))
        .await?
        .ok_or_else(invalid)?;
    if !verify_off_thread(req.password, creds.password_hash).await? {
        return Err(invalid());
    }
    let user = creds.user;
    let token = issue_token(&state, user.id).await?;
    tracing::debug!(user_id = user.id, "login");
    Ok(ok(AuthPayload { user, token }))
}

async fn logout(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let token_hash = caller.token_hash;
    state
        .db
        .call(move |db| db.delete_session(&token_hash))
        .await?;
    Ok(ok_with_message(serde_json::Value::Null, "Logged out"))
}

async fn me(caller: AuthUser) -> Json<super::ApiResponse<User>> {
    ok(caller.user)
}

async fn change_password(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let stored = state
        .db
        .call(move |db| db.get_password_hash(user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User", user_id))?;
    if !verify_off_thread(req.current_password, stored).await? {
        return Err(ApiError::Unauthorized("Current password is incorrect".into()));
    }
    auth::validate_password(&req.new_password, state.auth.min_password_length)?;

    let hash = hash_off_thread(req.new_password).await?;
    let keep = caller.token_hash;
    let revoked = state
        .db
        .call(move |db| {
            db.update_password(user_id, &hash)?;
            db.delete_other_sessions(user_id, &keep)
        })
        .await?;
    tracing::info!(user_id, revoked, "password changed");
    Ok(ok_with_message(serde_json::Value::Null, "Password updated"))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_returns_user_and_token() {
        let state = test_state();
        let (status, body) = send(
            &state,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "Ada@Example.com", "name": "Ada", "password": "password123"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "ada@example.com");
        assert!(body["data"]["user"].get("password_hash").is_none());
        assert_eq!(body["data"]["token"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_register_validation_and_duplicates() {
        let state = test_state();
        register(&state, "ada@example.com").await;

        for (payload, expected) in [
            (json!({"email": "ADA@example.com", "name": "Ada", "password": "password123"}), StatusCode::CONFLICT),
            (json!({"email": "nope", "name": "Ada", "password": "password123"}), StatusCode::BAD_REQUEST),
            (json!({"email": "b@example.com", "name": "  ", "password": "password123"}), StatusCode::BAD_REQUEST),
            (json!({"email": "b@example.com", "name": "B", "password": "short"}), StatusCode::BAD_REQUEST),
        ] {
            let (status, body) = send(&state, "POST", "/api/auth/register", None, Some(payload)).await;
            assert_eq!(status, expected, "{body}");
            assert_eq!(body["success"], false);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_register_same_email_conflicts() {
        let state = test_state();
        let payload = json!({"email": "ada@example.com", "name": "Ada", "password": "password123"});
        let ((a, _), (b, _)) = tokio::join!(
            send(&state, "POST", "/api/auth/register", None, Some(payload.clone())),
            send(&state, "POST", "/api/auth/register", None, Some(payload.clone())),
        );
        let mut statuses = [a, b];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let state = test_state();
        register(&state, "ada@example.com").await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "password123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let (status, body) = send(&state, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "ada");
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let state = test_state();
        register(&state, "ada@example.com").await;
        for payload in [
            json!({"email": "ada@example.com", "password": "wrong-password"}),
            json!({"email": "ghost@example.com", "password": "password123"}),
        ] {
            let (status, _) = send(&state, "POST", "/api/auth/login", None, Some(payload)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let state = test_state();
        let (_, token) = register(&state, "ada@example.com").await;
        let (status, _) = send(&state, "POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&state, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_change_password_revokes_other_sessions() {
        let state = test_state();
        let (_, first) = register(&state, "ada@example.com").await;
        let (_, body) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "password123"})),
        )
        .await;
        let second = body["data"]["token"].as_str().unwrap().to_string();

        let (status, _) = send(
            &state,
            "PUT",
            "/api/auth/password",
            Some(&second),
            Some(json!({"current_password": "wrong", "new_password": "newpassword1"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &state,
            "PUT",
            "/api/auth/password",
            Some(&second),
            Some(json!({"current_password": "password123", "new_password": "newpassword1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&state, "GET", "/api/auth/me", Some(&first), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&state, "GET", "/api/auth/me", Some(&second), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "newpassword1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
