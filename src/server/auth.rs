//! Session authentication for the desk API.
//!
//! A successful login returns an HS256 JWT inside an `HttpOnly`,
//! `SameSite=Strict` cookie. Every protected handler takes an
//! [`AuthenticatedUser`], which reads the cookie first and falls back to an
//! `Authorization: Bearer` header for scripted clients.
//!
//! # Configuration
//!
//! - `RTO_JWT_SECRET` - Required secret key for HS256 signing
//! - `RTO_JWT_ISSUER` - Expected issuer claim (default: "rto-docs")
//! - `RTO_JWT_AUDIENCE` - Expected audience claim (default: "rto-desk")

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::errors::{RtoError, RtoResult};

use super::api_error::{ApiError, ErrorCode};

/// Access level of a desk account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated user information extracted from the session.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub claims: Claims,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Owner filter for list queries.
    ///
    /// Admins see everything unless they ask for one owner; everyone else is
    /// pinned to their own records.
    pub fn owner_scope(&self, requested: Option<String>) -> Option<String> {
        if self.is_admin() {
            requested
        } else {
            Some(self.user_id.clone())
        }
    }

    /// Whether this user may read or modify a record owned by `owner_id`.
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

/// Authentication errors.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// Neither a session cookie nor a bearer token was sent
    MissingToken,
    /// Authorization header is present but not `Bearer <token>`
    InvalidHeader,
    InvalidToken(String),
    TokenExpired,
    /// Authenticated, but not allowed to perform the operation
    Forbidden,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "not logged in"),
            AuthError::InvalidHeader => write!(f, "invalid authorization header format"),
            AuthError::InvalidToken(msg) => write!(f, "invalid session: {msg}"),
            AuthError::TokenExpired => write!(f, "session has expired"),
            AuthError::Forbidden => write!(f, "admin role required"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match &err {
            AuthError::MissingToken | AuthError::InvalidHeader => ErrorCode::Unauthorized,
            AuthError::InvalidToken(_) | AuthError::TokenExpired => ErrorCode::InvalidToken,
            AuthError::Forbidden => ErrorCode::Forbidden,
        };
        ApiError::with_message(code, err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// JWT validator for token creation and verification.
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    expiration_secs: u64,
}

impl JwtValidator {
    pub fn from_config(config: &AuthConfig) -> RtoResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(RtoError::ConfigError(
                "jwt_secret is required for session authentication".to_string(),
            ));
        }

        // `env:NAME` reads the secret from another variable
        let secret = if let Some(env_var) = config.jwt_secret.strip_prefix("env:") {
            std::env::var(env_var).map_err(|_| {
                RtoError::ConfigError(format!(
                    "environment variable '{env_var}' not found for jwt_secret"
                ))
            })?
        } else {
            config.jwt_secret.clone()
        };

        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[&config.jwt_issuer]);
        validation.set_audience(&[&config.jwt_audience]);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiration_secs: config.token_expiration_secs,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(e.to_string()),
        })
    }

    /// Issue a session token for a user.
    pub fn create_token(&self, user_id: &str, username: &str, role: Role) -> RtoResult<String> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| RtoError::ServerError(format!("system time error: {e}")))?
            .as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            iat: now,
            exp: now + self.expiration_secs,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| RtoError::ServerError(format!("failed to create token: {e}")))
    }

    pub fn expiration_secs(&self) -> u64 {
        self.expiration_secs
    }
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration_secs", &self.expiration_secs)
            .finish()
    }
}

/// Authentication state shared by every handler.
#[derive(Clone, Debug)]
pub struct AuthState {
    pub validator: Arc<JwtValidator>,
    pub cookie_name: String,
    pub cookie_secure: bool,
}

impl AuthState {
    pub fn from_config(config: &AuthConfig) -> RtoResult<Self> {
        Ok(Self {
            validator: Arc::new(JwtValidator::from_config(config)?),
            cookie_name: config.cookie_name.clone(),
            cookie_secure: config.cookie_secure,
        })
    }

    /// `Set-Cookie` value carrying a fresh session token.
    pub fn session_cookie(&self, token: &str) -> String {
        self.cookie(token, self.validator.expiration_secs())
    }

    /// `Set-Cookie` value that removes the session.
    pub fn clear_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}",
            self.cookie_name
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Pull the session token from the request, cookie first.
    fn token_from_parts(&self, parts: &Parts) -> Result<String, AuthError> {
        for value in parts.headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let found = value.split(';').find_map(|pair| {
                let (name, token) = pair.trim().split_once('=')?;
                (name == self.cookie_name && !token.is_empty()).then(|| token.to_string())
            });
            if let Some(token) = found {
                return Ok(token);
            }
        }

        match parts.headers.get(header::AUTHORIZATION) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
                .ok_or(AuthError::InvalidHeader),
            None => Err(AuthError::MissingToken),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let token = auth_state.token_from_parts(parts)?;
        let claims = auth_state.validator.validate_token(&token)?.claims;

        Ok(AuthenticatedUser {
            user_id: claims.sub.clone(),
            username: claims.username.clone(),
            role: claims.role,
            claims,
        })
    }
}

/// Hash a password with bcrypt off the async runtime.
pub async fn hash_password(password: String, cost: u32) -> RtoResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| RtoError::ServerError(format!("hashing task failed: {e}")))?
        .map_err(|e| RtoError::ServerError(format!("failed to hash password: {e}")))
}

/// Check a password against a stored bcrypt hash off the async runtime.
pub async fn verify_password(password: String, hash: String) -> RtoResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| RtoError::ServerError(format!("hashing task failed: {e}")))?
        .map_err(|e| RtoError::ServerError(format!("failed to verify password: {e}")))
}
