use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use imagegen_core::error::{CoreError, StoreError};
use imagegen_pipeline::SubmitError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of the lower crates and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses of the form `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `imagegen_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A rejected or failed dispatcher operation.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// A storage error surfaced directly by a read path.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A body or query string that could not be decoded.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => classify_core_error(core),

            // --- Dispatcher errors ---
            AppError::Submit(err) => classify_submit_error(err),

            // --- Storage errors ---
            AppError::Store(err) => classify_store_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

/// Map a dispatcher rejection to an HTTP status and stable error code.
///
/// - Admission full maps to 429 so clients back off and retry.
/// - Unknown provider or unresolvable model maps to 422.
/// - Lifecycle conflicts (not queued, not failed, duplicate id) map to 409.
fn classify_submit_error(err: &SubmitError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        SubmitError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
        SubmitError::UnknownProvider(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_PROVIDER", message)
        }
        SubmitError::UnresolvedModel(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "UNRESOLVED_MODEL", message)
        }
        SubmitError::Capacity => (StatusCode::TOO_MANY_REQUESTS, "CAPACITY", message),
        SubmitError::DuplicateTask(_) => (StatusCode::CONFLICT, "CONFLICT", message),
        SubmitError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
        SubmitError::NotQueued(_) | SubmitError::NotFailed(_) => {
            (StatusCode::CONFLICT, "INVALID_STATE", message)
        }
        SubmitError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", message),
        SubmitError::Store(store) => classify_store_error(store),
    }
}

fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        StoreError::AlreadyExists { .. } => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "Storage error");
            internal()
        }
    }
}
