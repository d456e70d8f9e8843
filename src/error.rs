use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transition not allowed: {0}")]
    StateTransition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("out of stock: {0}")]
    OutOfStock(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::StateTransition(_) => "state_transition",
            AppError::Conflict(_) => "conflict",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::OutOfStock(_) => "out_of_stock",
            AppError::Expired(_) => "expired",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StateTransition(_) | AppError::Conflict(_) | AppError::OutOfStock(_) => {
                StatusCode::CONFLICT
            }
            AppError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Expired(_) => StatusCode::GONE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
