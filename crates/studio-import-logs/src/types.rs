//! Domain types shared by the accessor, the assembler and the logic layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::LogError;

/// Longest accepted task identifier, in bytes.
pub const MAX_TASK_ID_LEN: usize = 128;

/// Identifier of one import task.
///
/// Task IDs are used as a path component by the filesystem store, so only
/// ASCII alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn parse(raw: &str) -> Result<Self, LogError> {
        if raw.is_empty() {
            return Err(LogError::InvalidRequest("task id must not be empty".into()));
        }
        if raw.len() > MAX_TASK_ID_LEN {
            return Err(LogError::InvalidRequest(format!(
                "task id must be at most {MAX_TASK_ID_LEN} bytes"
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(LogError::InvalidRequest(format!(
                "task id '{raw}' contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an import task, as recorded by the import executor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Interrupted,
}

impl TaskStatus {
    /// `true` while workers may still append to the task's segments.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// Read-only view of an import task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportTask {
    pub id: TaskId,
    pub name: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportTask {
    /// A freshly created task with both timestamps set to now.
    pub fn new(id: TaskId, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Worker / shard index that produced a log segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// Archive entry name, stable for a given segment ID.
    pub fn entry_name(self) -> String {
        format!("shard-{:05}.log", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of log output, as enumerated from the log store.
///
/// `size` is the snapshot length observed at enumeration; readers never
/// deliver more than this many bytes even if the worker keeps appending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSegment {
    pub task_id: TaskId,
    pub id: SegmentId,
    pub size: u64,
    pub complete: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Listing entry returned to clients browsing a task's logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub segment: SegmentId,
    pub name: String,
    pub size: u64,
    pub complete: bool,
}

impl From<&LogSegment> for SegmentInfo {
    fn from(s: &LogSegment) -> Self {
        Self {
            segment: s.id,
            name: s.id.entry_name(),
            size: s.size,
            complete: s.complete,
        }
    }
}

/// A validated download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLogsRequest {
    pub task_id: TaskId,
    /// Restrict the artifact to a single segment.
    pub segment: Option<SegmentId>,
}

/// One page of lines read from a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLines {
    pub segment: SegmentId,
    pub offset: usize,
    pub lines: Vec<String>,
    /// More lines exist in the snapshot past this page.
    pub has_more: bool,
    /// At least one line in the page was cut to the configured length.
    pub truncated: bool,
}

/// Progress of a single download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RequestPhase {
    Received,
    Resolved,
    Assembling,
    Streaming,
    Complete,
    Failed,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Complete | RequestPhase::Failed)
    }
}
