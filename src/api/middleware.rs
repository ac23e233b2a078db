use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ShardingError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Sharding(#[from] ShardingError),

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

fn sharding_status(err: &ShardingError) -> StatusCode {
    match err {
        ShardingError::InvalidSql(_) => StatusCode::BAD_REQUEST,
        ShardingError::UnroutableStatement { .. }
        | ShardingError::BindingTableInconsistency { .. }
        | ShardingError::Algorithm { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ShardingError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ShardingError::Execution { .. } => StatusCode::BAD_GATEWAY,
        ShardingError::RewriteFailure { .. }
        | ShardingError::MergeTypeMismatch { .. }
        | ShardingError::MergeColumnNotFound(_)
        | ShardingError::InvalidRule(_)
        | ShardingError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Sharding(err) => {
                let detail = ErrorDetail::new(err.code(), err.to_string());
                // rewrite failures carry the statement that could not be rewritten
                let detail = match &err {
                    ShardingError::RewriteFailure { sql, .. } => detail.with_details(sql.clone()),
                    _ => detail,
                };
                (sharding_status(&err), detail)
            }
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
        match err.downcast::<ShardingError>() {
            Ok(sharding) => AppError::Sharding(sharding),
            Err(other) => AppError::Internal(format!("{:#}", other)),
        }
    }
}
