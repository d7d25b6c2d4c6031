use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::delivery::DeliveryStatus;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("an active delivery already exists for order {order_id}")]
    DuplicateDelivery { order_id: Uuid },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("no pending assignment of delivery {delivery_id} for driver {driver_id}")]
    AssignmentNotFound { delivery_id: Uuid, driver_id: Uuid },

    #[error("assignment {assignment_id} has expired")]
    AssignmentExpired { assignment_id: Uuid },

    #[error("no drivers available")]
    NoDriversAvailable,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("dependency failure: {0}")]
    DependencyFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors worth retrying when raised by an outbound port.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::DependencyFailure(_) | AppError::Internal(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateDelivery { .. } => StatusCode::CONFLICT,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::AssignmentNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::AssignmentExpired { .. } => StatusCode::GONE,
            AppError::NoDriversAvailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::DependencyFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
