use thiserror::Error;

/// Library-wide error type.
#[derive(Debug, Error)]
pub enum RtoError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    /// A uniqueness constraint rejected the write.
    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("server error: {0}")]
    ServerError(String),
}

pub type RtoResult<T> = Result<T, RtoError>;
