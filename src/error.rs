use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use ts_rs::TS;
use utoipa::ToSchema;

/// FieldError
///
/// A single field-level validation failure, surfaced to the caller in the
/// `details` array of a validation error response.
#[derive(Debug, Clone, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct FieldError {
    /// The offending payload field, in its wire (camelCase) spelling.
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// AppError
///
/// The application-wide error taxonomy. Every fallible operation in the
/// repository, auth, and upload layers resolves to one of these variants,
/// and `IntoResponse` turns them into the uniform
/// `{success: false, error, details?}` JSON envelope.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or missing input. Carries field-level detail for the caller.
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    /// Missing session or insufficient role. Deliberately carries no detail:
    /// the response body is a generic denial.
    #[error("Unauthorized")]
    Unauthorized,

    /// The addressed record does not exist. The payload is the entity name
    /// shown in the response ("Category", "Resource", ...).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A state-dependent refusal: self-parenting, delete-with-dependents,
    /// duplicate registration. Maps to 400, matching the API contract.
    #[error("{0}")]
    Conflict(String),

    /// Unexpected persistence or filesystem failure. The cause is logged;
    /// the response body never includes it.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl AppError {
    /// A validation error with a message and no field detail.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// A validation error carrying per-field detail.
    pub fn invalid_fields(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }
}

/// Database errors are storage failures by default. Call sites that care
/// about a specific failure (e.g. a slug unique-constraint conflict) must
/// inspect the `sqlx::Error` before letting `?` convert it.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Convenience alias for handler and repository return values.
pub type AppResult<T> = Result<T, AppError>;

/// Returns true when `err` is a PostgreSQL unique-constraint violation
/// (code 23505) on the named constraint.
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation { message, details } => {
                let body = if details.is_empty() {
                    json!({ "success": false, "error": message })
                } else {
                    json!({ "success": false, "error": message, "details": details })
                };
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "error": "Unauthorized" }),
            ),
            AppError::NotFound(entity) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": format!("{entity} not found") }),
            ),
            AppError::Conflict(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "error": message }),
            ),
            AppError::Storage(cause) => {
                // Log the real cause for operators; the client gets a
                // generic failure message.
                tracing::error!(error = %cause, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": "An internal error occurred" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}
