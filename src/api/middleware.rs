use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    #[error("Decomposition error: {0}")]
    Decompose(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Local store error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", msg),
            ),
            AppError::Connection(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("CONNECTION_ERROR", msg),
            ),
            AppError::InvalidSql(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("INVALID_SQL", msg),
            ),
            AppError::Decompose(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("DECOMPOSE_ERROR", msg),
            ),
            AppError::Schema(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("SCHEMA_ERROR", msg),
            ),
            AppError::Data(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("DATA_ERROR", msg),
            ),
            AppError::Storage(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("STORAGE_ERROR", msg),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert duckdb::Error to AppError
impl From<duckdb::Error> for AppError {
    fn from(err: duckdb::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}
