//! Desk accounts: login, logout and user administration.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{RtoError, RtoResult};
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::{hash_password, verify_password, AuthenticatedUser, Role};
use crate::server::database::{Database, User};
use crate::server::handlers::AppState;
use crate::server::logging::{log_account_event, AccountEvent};
use crate::server::validation::{validate_password, validate_username, ValidationErrors};

/// Environment variable holding `username:password` for the first admin.
pub const BOOTSTRAP_ADMIN_ENV: &str = "RTO_BOOTSTRAP_ADMIN";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    /// Same value as the session cookie, for clients that send `Bearer`
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Option<Role>,
}

/// A user without the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub role: String,
    pub created_at: Option<NaiveDateTime>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            created_at: Some(user.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserResponse>,
}

fn invalid_credentials() -> ApiError {
    ApiError::new(ErrorCode::InvalidCredentials)
}

/// `POST /api/v1/auth/login`
pub async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let username = payload.username.trim();

    let Some(user) = state.db.get_user_by_username(username).await? else {
        log_account_event(AccountEvent::LoginFailed, username);
        return Err(invalid_credentials());
    };

    if !verify_password(payload.password, user.password_hash.clone()).await? {
        log_account_event(AccountEvent::LoginFailed, username);
        return Err(invalid_credentials());
    }

    let Some(role) = Role::parse(&user.role) else {
        error!("User {} has unknown role {}", user.id, user.role);
        return Err(ApiError::internal_error());
    };
    let token = state
        .auth
        .validator
        .create_token(&user.id, &user.username, role)?;
    let cookie = state.auth.session_cookie(&token);

    log_account_event(AccountEvent::LoginSucceeded, &user.username);

    let body = LoginResponse {
        user: user.into(),
        token,
        expires_in: state.auth.validator.expiration_secs(),
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// `POST /api/v1/auth/logout`
pub async fn logout_handler(State(state): State<AppState>, user: AuthenticatedUser) -> Response {
    log_account_event(AccountEvent::LoggedOut, &user.username);
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, state.auth.clear_cookie())],
    )
        .into_response()
}

/// `GET /api/v1/auth/me`
pub async fn me_handler(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(UserResponse {
        id: user.user_id,
        username: user.username,
        role: user.role.to_string(),
        created_at: None,
    })
}

/// `POST /api/v1/users` (admin)
pub async fn create_user_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    user.require_admin()?;

    let username = payload.username.trim().to_string();
    let mut errors = ValidationErrors::new();
    errors.check(validate_username(&username, "username"));
    errors.check(validate_password(&payload.password, "password"));
    errors.into_result()?;

    let created = create_account(
        &state.db,
        username,
        payload.password,
        payload.role.unwrap_or(Role::User),
        state.bcrypt_cost,
    )
    .await?;
    info!("User {} created by {}", created.username, user.username);

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// `GET /api/v1/users` (admin)
pub async fn list_users_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UsersResponse>, ApiError> {
    user.require_admin()?;

    let users = state.db.list_users().await?;
    Ok(Json(UsersResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}

async fn create_account(
    db: &Database,
    username: String,
    password: String,
    role: Role,
    bcrypt_cost: u32,
) -> RtoResult<User> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        username,
        password_hash: hash_password(password, bcrypt_cost).await?,
        role: role.as_str().to_string(),
        created_at: Utc::now().naive_utc(),
    };
    db.create_user(&user).await?;
    log_account_event(AccountEvent::UserCreated, &user.username);
    Ok(user)
}

/// Split a `username:password` bootstrap value.
pub fn parse_bootstrap_credentials(value: &str) -> RtoResult<(String, String)> {
    let (username, password) = value.split_once(':').ok_or_else(|| {
        RtoError::ConfigError(format!("{BOOTSTRAP_ADMIN_ENV} must be username:password"))
    })?;
    let username = username.trim();

    validate_username(username, "username")
        .and_then(|_| validate_password(password, "password"))
        .map_err(|e| RtoError::ConfigError(format!("{BOOTSTRAP_ADMIN_ENV}: {}", e.message)))?;

    Ok((username.to_string(), password.to_string()))
}

/// Create the first admin from `RTO_BOOTSTRAP_ADMIN` when no users exist.
///
/// Returns the created user, or `None` when the variable is unset or users
/// are already present.
pub async fn bootstrap_admin_from_env(db: &Database, bcrypt_cost: u32) -> RtoResult<Option<User>> {
    let Ok(value) = std::env::var(BOOTSTRAP_ADMIN_ENV) else {
        return Ok(None);
    };

    if db.count_users().await? > 0 {
        warn!("{BOOTSTRAP_ADMIN_ENV} is set but users already exist; ignoring it");
        return Ok(None);
    }

    let (username, password) = parse_bootstrap_credentials(&value)?;
    let user = create_account(db, username, password, Role::Admin, bcrypt_cost).await?;
    info!("Bootstrapped admin account {}", user.username);
    Ok(Some(user))
}
