use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{AccessToken, AccessTokenRepo, DbError, User, UserRepo};
use crate::error::{AppError, AppResult};
use crate::server::AppState;

use super::{ok, ok_message, ApiResult};

/// The authenticated principal, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("missing access token".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires: Option<DateTime<Utc>>,
    pub user: User,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::InvalidArgument("username must not be empty".to_string()));
    }

    let user = match state.db.get_user(username).await {
        Ok(user) => {
            if !verify_password(&req.password, &user.password).await? {
                warn!(user = username, "login failed");
                return Err(AppError::Unauthenticated("invalid username or password".to_string()));
            }
            user
        }
        Err(DbError::NotFound(_)) if state.config.auth.autoregister => {
            let hash = hash_password(&req.password, state.config.auth.password_cost).await?;
            let user = state.db.create_user(username, &hash).await?;
            info!(user = username, id = user.id, "registered user");
            user
        }
        Err(DbError::NotFound(_)) => {
            return Err(AppError::Unauthenticated("invalid username or password".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    let token = AccessToken {
        token: uuid::Uuid::new_v4().to_string(),
        userid: user.id,
        created: now,
        expires: Some(now + state.config.auth.token_lifetime()),
        lastused: None,
    };
    state.db.upsert_token(&token).await?;
    state.db.update_last_login(user.id, now).await?;
    debug!(user = user.id, "issued access token");

    ok(LoginResponse {
        token: token.token,
        expires: token.expires,
        user,
    })
}

pub async fn logout(State(state): State<AppState>, user: AuthUser) -> ApiResult<()> {
    state.db.delete_token(&user.token).await?;
    ok_message("logged out")
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<User> {
    ok(state.db.get_user_by_id(user.user_id).await?)
}

/// Rejects requests without a valid, unexpired token.
pub async fn require_auth(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&req, &params).ok_or_else(|| AppError::Unauthenticated("missing access token".to_string()))?;

    let access = match state.db.get_token(&token).await {
        Ok(access) => access,
        Err(DbError::NotFound(_)) => return Err(AppError::Unauthenticated("invalid access token".to_string())),
        Err(e) => return Err(e.into()),
    };
    if access.is_expired(Utc::now()) {
        state.db.delete_token(&token).await?;
        return Err(AppError::Unauthenticated("access token expired".to_string()));
    }

    req.extensions_mut().insert(AuthUser {
        user_id: access.userid,
        token,
    });
    Ok(next.run(req).await)
}

fn extract_token(req: &Request, params: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    if let Some(token) = req.headers().get("X-Api-Token").and_then(|h| h.to_str().ok()) {
        return Some(token.to_string());
    }

    params.get("api_key").or_else(|| params.get("token")).cloned()
}

async fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

async fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    match verified {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!(error = %e, "stored password hash is unusable");
            Ok(false)
        }
    }
}
