use crate::client::ProviderError;
use crate::db::DbError;
use crate::media::{ListError, MediaItemError};

/// Error kinds surfaced by the service layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("provider error: {0}")]
    Provider(ProviderError),
    #[error("database error: {0}")]
    Database(DbError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unsupported(feature) => AppError::UnsupportedFeature(feature),
            ProviderError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Provider(other),
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => AppError::NotFound(what),
            DbError::Conflict(what) | DbError::AlreadyExists(what) => AppError::Conflict(what),
            other => AppError::Database(other),
        }
    }
}

impl From<ListError> for AppError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::InvalidArgument(msg) => AppError::InvalidArgument(msg),
            ListError::NotFound(msg) => AppError::NotFound(msg),
            ListError::PermissionDenied(msg) => AppError::PermissionDenied(msg),
        }
    }
}

impl From<MediaItemError> for AppError {
    fn from(err: MediaItemError) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}
