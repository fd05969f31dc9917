use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} already exists")]
    Conflict(String),
}

/// Errors surfaced by HTTP handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("Malformed payload: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => AppError::Conflict(format!("{what} already exists")),
            other => AppError::Store(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(details) => {
                tracing::warn!(?details, "validation failed");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::BadRequest(msg) => {
                tracing::warn!("bad request: {msg}");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("unauthorized: {msg}");
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
            AppError::Forbidden(msg) => {
                tracing::warn!("forbidden: {msg}");
                (
                    StatusCode::FORBIDDEN,
                    "You do not have permission to do that".to_string(),
                )
            }
            AppError::NotFound(msg) => {
                tracing::info!("not found: {msg}");
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::Conflict(msg) => {
                tracing::info!("conflict: {msg}");
                (StatusCode::CONFLICT, msg.clone())
            }
            AppError::Store(_) | AppError::Hash(_) | AppError::Io(_) => {
                tracing::error!("internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong".to_string(),
                )
            }
        };

        let body = match self {
            AppError::Validation(details) => json!({
                "error": message,
                "status": status.as_u16(),
                "details": details,
            }),
            _ => json!({
                "error": message,
                "status": status.as_u16(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
