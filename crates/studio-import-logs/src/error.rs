use thiserror::Error;

use crate::types::{SegmentId, TaskId};

/// Errors produced while locating, assembling or streaming import-task logs.
#[derive(Debug, Error)]
pub enum LogError {
    /// The request was structurally valid but carried an unusable value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The task (or a segment explicitly selected by the caller) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The task directory or the log storage could not be reached.
    #[error("log storage unavailable: {message}")]
    StorageUnavailable {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A segment became unreadable after it was enumerated.
    #[error("failed to read segment {segment} of import task {task_id}: {source}")]
    PartialReadFailure {
        task_id: TaskId,
        segment: SegmentId,
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    pub fn task_not_found(task_id: &TaskId) -> Self {
        LogError::NotFound(format!("import task {task_id} does not exist"))
    }

    pub fn storage(message: impl Into<String>, source: std::io::Error) -> Self {
        LogError::StorageUnavailable {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Short machine-readable classification, used as a `tracing` field.
    pub fn kind(&self) -> &'static str {
        match self {
            LogError::InvalidRequest(_) => "invalid_request",
            LogError::NotFound(_) => "not_found",
            LogError::StorageUnavailable { .. } => "storage_unavailable",
            LogError::PartialReadFailure { .. } => "partial_read_failure",
        }
    }
}
