//! Development identity provider and account endpoints.

#![allow(clippy::unused_async)]

use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use kernel::{
    bytes_to_mb, AuthSession, Credentials, ErrorBody, Message, Probe, RefreshRequest, Tier,
    UserInfo,
};
use uuid::Uuid;

use crate::domain::{Storage, TokenKind, UserRecord};
use crate::error::ApiError;
use crate::handlers::{created, execute};
use crate::sqlite::{Mode, Sqlite};
use crate::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const MIN_PASSWORD_LEN: usize = 6;
const REFRESH_TOKEN_DAYS: i64 = 30;

/// Caller identified by a valid bearer id token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let owner = execute(&state.db, Mode::ReadOnly, |repository| {
            repository.token_owner(token, TokenKind::Id)
        })?;
        match owner {
            Some(uid) => Ok(AuthUser { uid }),
            None => {
                tracing::warn!("token verification failed");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn verify_password(user: &UserRecord, password: &str) -> bool {
    let Ok(stored) = blake3::Hash::from_hex(&user.password_hash) else {
        return false;
    };
    let mut hasher = blake3::Hasher::new();
    hasher.update(user.salt.as_bytes());
    hasher.update(password.as_bytes());
    // blake3::Hash equality is constant time
    hasher.finalize() == stored
}

fn validate(credentials: &Credentials) -> Result<(), ApiError> {
    let email = credentials.email.trim();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(ApiError::BadRequest("The email address is badly formatted".to_owned()));
    }
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password should be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn issue_session(
    repository: &mut Sqlite,
    user: &UserRecord,
    ttl: u64,
) -> Result<AuthSession, ApiError> {
    let now = Utc::now();
    let id_token = new_token();
    let refresh_token = new_token();
    let id_expiry = i64::try_from(ttl)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    repository.store_token(&id_token, &user.uid, TokenKind::Id, id_expiry)?;
    repository.store_token(
        &refresh_token,
        &user.uid,
        TokenKind::Refresh,
        now + Duration::days(REFRESH_TOKEN_DAYS),
    )?;
    Ok(AuthSession {
        uid: user.uid.clone(),
        email: user.email.clone(),
        id_token,
        refresh_token,
        expires_in: ttl,
    })
}

/// Account view with storage figures in megabytes.
pub(crate) fn user_info(repository: &Sqlite, uid: &str) -> Result<UserInfo, ApiError> {
    let user = repository
        .get_user(uid)?
        .ok_or_else(|| ApiError::not_found("User"))?;
    let (bytes, _) = repository.usage(uid)?;
    let display_name = user.display_name.or_else(|| {
        user.email
            .split('@')
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    });
    Ok(UserInfo {
        uid: user.uid,
        email: user.email,
        display_name,
        subscription_tier: user.tier,
        storage_used: bytes_to_mb(bytes),
        storage_limit: user.tier.storage_limit_mb(),
    })
}

/// Liveness probe that needs no token
#[utoipa::path(
    get,
    path = "/api/auth/test",
    tag = "auth",
    responses(
        (status = 200, description = "Backend is up", body = Probe),
    ),
)]
pub async fn probe() -> Json<Probe> {
    Json(Probe {
        message: "Backend is working!".to_owned(),
        timestamp: Utc::now(),
    })
}

/// Creates a basic tier account and signs it in
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 201, description = "Account created", body = AuthSession),
        (status = 400, description = "Invalid or duplicate email, weak password", body = ErrorBody),
    ),
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&credentials)?;
    let salt = new_token();
    let user = UserRecord {
        uid: Uuid::new_v4().simple().to_string(),
        email: credentials.email.trim().to_lowercase(),
        display_name: None,
        tier: Tier::Basic,
        password_hash: hash_password(&salt, &credentials.password),
        salt,
    };
    let session = execute(&state.db, Mode::ReadWrite, |mut repository| {
        repository.create_user(&user)?;
        issue_session(&mut repository, &user, state.config.token_ttl)
    })?;
    tracing::info!("account {} created", session.uid);
    Ok(created(Json(session)))
}

#[utoipa::path(
    post,
    path = "/api/auth/signin",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Signed in", body = AuthSession),
        (status = 400, description = "Invalid email or password", body = ErrorBody),
    ),
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<AuthSession>, ApiError> {
    let email = credentials.email.trim().to_lowercase();
    let session = execute(&state.db, Mode::ReadWrite, |mut repository| {
        let user = repository
            .find_user_by_email(&email)?
            .filter(|u| verify_password(u, &credentials.password))
            .ok_or_else(|| ApiError::BadRequest(INVALID_CREDENTIALS.to_owned()))?;
        issue_session(&mut repository, &user, state.config.token_ttl)
    })?;
    tracing::info!("user {} signed in", session.uid);
    Ok(Json(session))
}

/// Exchanges a refresh token for a new session
#[utoipa::path(
    post,
    path = "/api/auth/token",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session renewed", body = AuthSession),
        (status = 401, description = "Unknown or expired refresh token", body = ErrorBody),
    ),
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    let session = execute(&state.db, Mode::ReadWrite, |mut repository| {
        let uid = repository
            .take_refresh_token(&request.refresh_token)?
            .ok_or(ApiError::Unauthorized)?;
        let user = repository.get_user(&uid)?.ok_or(ApiError::Unauthorized)?;
        issue_session(&mut repository, &user, state.config.token_ttl)
    })?;
    tracing::debug!("session renewed for {}", session.uid);
    Ok(Json(session))
}

#[utoipa::path(
    post,
    path = "/api/auth/signout",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tokens revoked", body = Message),
        (status = 401, description = "Authentication failed", body = ErrorBody),
    ),
)]
pub async fn sign_out(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Message>, ApiError> {
    let revoked = execute(&state.db, Mode::ReadWrite, |mut repository| {
        repository.revoke_tokens(&user.uid)
    })?;
    tracing::info!("user {} signed out, {revoked} tokens revoked", user.uid);
    Ok(Json(Message::new("Signed out successfully")))
}

/// Returns the caller's account
#[utoipa::path(
    get,
    path = "/api/auth/verify",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Token is valid", body = UserInfo),
        (status = 401, description = "Authentication failed", body = ErrorBody),
    ),
)]
pub async fn verify(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserInfo>, ApiError> {
    let info = execute(&state.db, Mode::ReadOnly, |repository| {
        user_info(&repository, &user.uid)
    })?;
    Ok(Json(info))
}

#[utoipa::path(
    get,
    path = "/api/auth/user/{id}",
    tag = "auth",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Account found", body = UserInfo),
        (status = 403, description = "Not the caller's account", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
)]
pub async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserInfo>, ApiError> {
    if id != user.uid {
        return Err(ApiError::Forbidden("Access denied".to_owned()));
    }
    let info = execute(&state.db, Mode::ReadOnly, |repository| {
        user_info(&repository, &id)
    })?;
    Ok(Json(info))
}
