//! # API Error Type
//!
//! Unified error type for control API handlers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  handler ──► ControlApi ──► SyncError ──► ApiError ──► HTTP response    │
//! │                                                                         │
//! │   Core(Validation)            VALIDATION_ERROR        400               │
//! │   Core(DuplicateNumber)       CONFLICT                409               │
//! │   Core(InvoiceNotFound)       NOT_FOUND               404               │
//! │   Fiscal(Unreachable)         BACKEND_UNAVAILABLE     503               │
//! │   Fiscal(Rejected/Transient)  BACKEND_ERROR           502               │
//! │   ShuttingDown                SHUTTING_DOWN           503               │
//! │   Database(..)                DATABASE_ERROR          500               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The body is always:
//! ```json
//! { "code": "BACKEND_UNAVAILABLE", "message": "connection refused" }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use fiscal_core::CoreError;
use fiscal_db::DbError;
use fiscal_sync::{FiscalError, SyncError};

/// Error returned from control API handlers.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Human-readable message for the operator
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Resource not found (404)
    NotFound,

    /// Input validation failed (400)
    ValidationError,

    /// Conflicts with existing state (409)
    Conflict,

    /// Lifecycle rule refused the request (422)
    BusinessLogic,

    /// Fiscal backend answered with an error (502)
    BackendError,

    /// Fiscal backend could not be reached (503)
    BackendUnavailable,

    /// Agent is stopping (503)
    ShuttingDown,

    /// Database operation failed (500)
    DatabaseError,

    /// Internal server error (500)
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::BusinessLogic => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::BackendError => StatusCode::BAD_GATEWAY,
            ErrorCode::BackendUnavailable | ErrorCode::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::DatabaseError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvoiceNotFound(id) => {
                ApiError::new(ErrorCode::NotFound, format!("Invoice not found: {}", id))
            }
            CoreError::DuplicateNumber { .. } => ApiError::new(ErrorCode::Conflict, err.to_string()),
            CoreError::Validation(e) => ApiError::new(ErrorCode::ValidationError, e.to_string()),
            CoreError::InvalidTransition { .. }
            | CoreError::FiscalDayClosed { .. }
            | CoreError::MissingConfirmation(_)
            | CoreError::MissingSignature(_) => {
                ApiError::new(ErrorCode::BusinessLogic, err.to_string())
            }
        }
    }
}

impl From<FiscalError> for ApiError {
    fn from(err: FiscalError) -> Self {
        let code = if err.is_unreachable() {
            ErrorCode::BackendUnavailable
        } else {
            ErrorCode::BackendError
        };
        ApiError::new(code, err.reason())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => {
                ApiError::new(ErrorCode::NotFound, format!("{} not found: {}", entity, id))
            }
            DbError::UniqueViolation { field, value } => ApiError::new(
                ErrorCode::Conflict,
                format!("{} '{}' already exists", field, value),
            ),
            other => {
                // Details stay in the log
                tracing::error!(error = %other, "Database operation failed");
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Core(e) => e.into(),
            SyncError::Fiscal(e) => e.into(),
            SyncError::Database(e) => e.into(),
            SyncError::ShuttingDown => ApiError::new(ErrorCode::ShuttingDown, "Agent is shutting down"),
            SyncError::InvalidConfig(_) | SyncError::InvalidUrl(_) => {
                ApiError::new(ErrorCode::ValidationError, err.to_string())
            }
            other => {
                tracing::error!(error = %other, "Control command failed");
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fiscal_core::ValidationError;

    #[test]
    fn test_backend_errors_map_to_gateway_codes() {
        let err: ApiError = SyncError::Fiscal(FiscalError::Unreachable("refused".into())).into();
        assert_eq!(err.code, ErrorCode::BackendUnavailable);
        assert_eq!(err.code.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.message, "refused");

        let err: ApiError = SyncError::Fiscal(FiscalError::Rejected("422: bad".into())).into();
        assert_eq!(err.code.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_domain_errors() {
        let err: ApiError = SyncError::Core(CoreError::DuplicateNumber {
            number: "INV-1".into(),
            day_no: 2,
        })
        .into();
        assert_eq!(err.code, ErrorCode::Conflict);

        let err: ApiError = SyncError::Core(CoreError::Validation(ValidationError::Required {
            field: "number".into(),
        }))
        .into();
        assert_eq!(err.code.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = SyncError::ShuttingDown.into();
        assert_eq!(err.code, ErrorCode::ShuttingDown);
    }

    #[test]
    fn test_serialized_shape() {
        let err = ApiError::new(ErrorCode::NotFound, "Invoice not found: x");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "Invoice not found: x");
    }
}
