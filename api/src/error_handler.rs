//! Public application error type with JSON responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use review_engine::EngineError;
use review_store::StoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // --- Request / routing ---
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("signature verification failed")]
    Unauthorized,

    // --- Lower layers ---
    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Engine(EngineError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Store(StoreError::TaskNotFound(_))
            | AppError::Store(StoreError::RepoNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(EngineError::TaskNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(EngineError::NotCancellable { .. }) => StatusCode::CONFLICT,
            AppError::Engine(EngineError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound => "NOT_FOUND",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Store(StoreError::TaskNotFound(_)) => "TASK_NOT_FOUND",
            AppError::Store(StoreError::RepoNotFound(_)) => "REPO_NOT_FOUND",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Engine(EngineError::TaskNotFound(_)) => "TASK_NOT_FOUND",
            AppError::Engine(EngineError::NotCancellable { .. }) => "NOT_CANCELLABLE",
            AppError::Engine(EngineError::ShuttingDown) => "SHUTTING_DOWN",
            AppError::Engine(_) => "ENGINE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Handy result alias used across handlers.
pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
