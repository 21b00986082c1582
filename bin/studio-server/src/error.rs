//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body HTTP
//! response with an appropriate status code.
//!
//! Internal errors (unreadable segments, unreachable storage) are logged with
//! full detail but only a generic message is returned, so file paths never
//! reach clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use studio_import_logs::LogError;
use thiserror::Error;
use tracing::{error, warn};

/// All errors that can occur in the studio-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a task or segment that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Log storage or the task table cannot be reached right now.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LogError> for ServerError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::InvalidRequest(m) => ServerError::BadRequest(m),
            LogError::NotFound(m) => ServerError::NotFound(m),
            e @ LogError::StorageUnavailable { .. } => {
                let source = std::error::Error::source(&e).map(ToString::to_string);
                warn!(error = %e, source = ?source, "log storage unavailable");
                ServerError::Unavailable(e.to_string())
            }
            e @ LogError::PartialReadFailure { .. } => ServerError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::BadRequest(m) | ServerError::NotFound(m) => m.clone(),

            // Already logged with its source when converted.
            ServerError::Unavailable(_) => "logs temporarily unavailable, retry".to_owned(),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
