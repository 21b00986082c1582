//! Log Store Accessor.
//!
//! Two collaborators sit behind the accessor:
//!
//! - [`TaskDirectory`] answers "does this import task exist and what is its
//!   status". The server implements it over the `import_tasks` table.
//! - [`LogStore`] enumerates and opens the raw segments written by import
//!   workers. [`fs::FsLogStore`] reads them from local disk and
//!   [`memory::MemoryLogStore`] keeps them in process.
//!
//! [`LogAccessor`] combines both and owns the ordering rule: segments always
//! come back sorted by [`SegmentId`], whatever order the store listed them in.

pub mod fs;
pub mod memory;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::error::LogError;
use crate::types::{ImportTask, LogSegment, SegmentId, TaskId};

/// Readable byte stream over one segment.
pub type SegmentReader = Pin<Box<dyn AsyncRead + Send>>;

/// Source of task existence and status.
#[async_trait]
pub trait TaskDirectory: Send + Sync + 'static {
    /// `Ok(None)` when the task is unknown; `Err` only when the directory
    /// itself cannot be queried.
    async fn find_task(&self, task_id: &TaskId) -> Result<Option<ImportTask>, LogError>;
}

/// Read-only access to the segments written by import workers.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Segments currently present for `task_id`, in any order.
    ///
    /// A task that has not written anything yet yields an empty list.
    async fn list_segments(&self, task_id: &TaskId) -> Result<Vec<LogSegment>, LogError>;

    /// Open a reader positioned at the start of `segment`.
    ///
    /// The reader may expose more bytes than `segment.size` if the worker
    /// kept appending; callers bound their reads by the enumerated size.
    async fn open_segment(&self, segment: &LogSegment) -> Result<SegmentReader, LogError>;
}

/// Resolves tasks and enumerates their segments.
#[derive(Clone)]
pub struct LogAccessor {
    tasks: Arc<dyn TaskDirectory>,
    store: Arc<dyn LogStore>,
}

impl std::fmt::Debug for LogAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogAccessor")
    }
}

impl LogAccessor {
    pub fn new(tasks: Arc<dyn TaskDirectory>, store: Arc<dyn LogStore>) -> Self {
        Self { tasks, store }
    }

    pub fn store(&self) -> Arc<dyn LogStore> {
        Arc::clone(&self.store)
    }

    /// Confirm the task exists.
    pub async fn resolve(&self, task_id: &TaskId) -> Result<ImportTask, LogError> {
        self.tasks
            .find_task(task_id)
            .await?
            .ok_or_else(|| LogError::task_not_found(task_id))
    }

    /// Segments of an already resolved task, ordered by segment ID.
    pub async fn segments(&self, task: &ImportTask) -> Result<Vec<LogSegment>, LogError> {
        let mut segments = self.store.list_segments(&task.id).await?;
        segments.sort_by_key(|s| s.id);

        let before = segments.len();
        segments.dedup_by_key(|s| s.id);
        if segments.len() != before {
            warn!(
                task_id = %task.id,
                duplicates = before - segments.len(),
                "log store listed duplicate segment ids; keeping the first of each"
            );
        }

        debug!(task_id = %task.id, segments = segments.len(), "segments enumerated");
        Ok(segments)
    }

    /// Resolve `task_id` and return the single segment `id`.
    pub async fn segment(
        &self,
        task_id: &TaskId,
        id: SegmentId,
    ) -> Result<LogSegment, LogError> {
        let task = self.resolve(task_id).await?;
        self.segments(&task)
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| segment_not_found(task_id, id))
    }

    pub async fn open(&self, segment: &LogSegment) -> Result<SegmentReader, LogError> {
        self.store.open_segment(segment).await
    }
}

pub(crate) fn segment_not_found(task_id: &TaskId, id: SegmentId) -> LogError {
    LogError::NotFound(format!(
        "log segment {id} of import task {task_id} does not exist"
    ))
}
