//! Password hashing, bearer token issuing and the `AuthUser` extractor.
//!
//! Passwords are stored as Argon2id PHC strings. Bearer tokens are random
//! 64-character hex strings handed to the client once; only their SHA-256
//! digest is persisted in the `sessions` table.

use std::sync::LazyLock;

use anyhow::Result;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::SharedState;
use crate::errors::ApiError;
use crate::models::User;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid")
});

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Returns `false` for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash could not be parsed");
            false
        }
    }
}

pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if EMAIL_RE.is_match(email.trim()) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid email address: {}", email)))
    }
}

pub fn validate_password(password: &str, min_length: usize) -> Result<(), ApiError> {
    if password.chars().count() < min_length {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            min_length
        )));
    }
    Ok(())
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    /// Digest of the presented token, used to revoke this session on logout.
    pub token_hash: String,
}

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }
}

/// Resolve a raw bearer token to its user, or 401.
pub async fn authenticate(state: &SharedState, token: &str) -> Result<AuthUser, ApiError> {
    let token_hash = hash_token(token);
    let lookup = token_hash.clone();
    let user = state
        .db
        .call(move |db| db.find_session_user(&lookup))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".into()))?;
    Ok(AuthUser { user, token_hash })
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;
        let token = bearer_token(header)
            .ok_or_else(|| ApiError::Unauthorized("Expected a Bearer token".into()))?;
        authenticate(state, token).await
    }
}
