//! Request and response bodies for the import-task log endpoints.
//!
//! Path and query values arrive as plain strings / numbers and are turned
//! into library types by an explicit `validate()` per request type.

use serde::{Deserialize, Serialize};
use studio_import_logs::{
    DownloadLogsRequest, ImportTask, LogLines, SegmentId, SegmentInfo, TaskId,
};
use utoipa::{IntoParams, ToSchema};

use crate::error::ServerError;

/// Path-only requests (task status, segment listing) carry nothing but the ID.
pub fn validate_task_id(raw: &str) -> Result<TaskId, ServerError> {
    TaskId::parse(raw).map_err(ServerError::from)
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct DownloadLogsQuery {
    /// Only download this segment (worker index).
    pub segment: Option<u32>,
}

impl DownloadLogsQuery {
    pub fn validate(&self, task_id: &str) -> Result<DownloadLogsRequest, ServerError> {
        Ok(DownloadLogsRequest {
            task_id: validate_task_id(task_id)?,
            segment: self.segment.map(SegmentId),
        })
    }
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct LogLinesQuery {
    /// Zero-based index of the first line to return.
    pub offset: Option<usize>,
    /// Number of lines to return; capped by the server.
    pub limit: Option<usize>,
}

/// A validated line-page request.
#[derive(Debug)]
pub struct LogLinesRequest {
    pub task_id: TaskId,
    pub segment: SegmentId,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl LogLinesQuery {
    pub fn validate(&self, task_id: &str, segment: u32) -> Result<LogLinesRequest, ServerError> {
        if self.limit == Some(0) {
            return Err(ServerError::BadRequest("limit must be at least 1".into()));
        }
        Ok(LogLinesRequest {
            task_id: validate_task_id(task_id)?,
            segment: SegmentId(segment),
            offset: self.offset.unwrap_or(0),
            limit: self.limit,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportTaskResponse {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ImportTask> for ImportTaskResponse {
    fn from(task: ImportTask) -> Self {
        Self {
            id: task.id.to_string(),
            name: task.name,
            status: task.status.to_string(),
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogSegmentResponse {
    pub segment: u32,
    /// Entry name used inside multi-segment archives.
    pub name: String,
    pub size: u64,
    /// The worker has finished writing this segment.
    pub complete: bool,
}

impl From<SegmentInfo> for LogSegmentResponse {
    fn from(info: SegmentInfo) -> Self {
        Self {
            segment: info.segment.0,
            name: info.name,
            size: info.size,
            complete: info.complete,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogLinesResponse {
    pub segment: u32,
    pub offset: usize,
    pub lines: Vec<String>,
    pub has_more: bool,
    pub truncated: bool,
}

impl From<LogLines> for LogLinesResponse {
    fn from(page: LogLines) -> Self {
        Self {
            segment: page.segment.0,
            offset: page.offset,
            lines: page.lines,
            has_more: page.has_more,
            truncated: page.truncated,
        }
    }
}
