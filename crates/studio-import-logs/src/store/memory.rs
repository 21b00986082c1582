//! In-process task directory and log store.
//!
//! Useful for embedding the log service without a database or a log
//! directory, and as the reference backend in tests. Segment bytes are
//! copied out at open time, which gives readers the same snapshot-at-open
//! view the filesystem store has.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, ReadBuf};

use super::{segment_not_found, LogStore, SegmentReader, TaskDirectory};
use crate::error::LogError;
use crate::types::{ImportTask, LogSegment, SegmentId, TaskId, TaskStatus};

#[derive(Debug, Default)]
pub struct MemoryTaskDirectory {
    tasks: RwLock<HashMap<TaskId, ImportTask>>,
}

impl MemoryTaskDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a task and hand back a copy of it.
    pub fn insert(&self, task: ImportTask) -> ImportTask {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), task.clone());
        task
    }

    /// Returns `false` when the task is unknown.
    pub fn set_status(&self, task_id: &TaskId, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(task_id) {
            Some(task) => {
                task.status = status;
                task.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TaskDirectory for MemoryTaskDirectory {
    async fn find_task(&self, task_id: &TaskId) -> Result<Option<ImportTask>, LogError> {
        Ok(self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned())
    }
}

#[derive(Debug)]
struct MemorySegment {
    data: Vec<u8>,
    complete: bool,
    modified_at: DateTime<Utc>,
}

/// Append-only segments held in memory, keyed by (task, segment).
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    segments: RwLock<HashMap<TaskId, BTreeMap<SegmentId, MemorySegment>>>,
    open_readers: Arc<AtomicUsize>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to a segment, creating it on first write.
    pub fn append(&self, task_id: &TaskId, segment: SegmentId, bytes: &[u8]) {
        let mut guard = self.segments.write().unwrap_or_else(PoisonError::into_inner);
        let entry = guard
            .entry(task_id.clone())
            .or_default()
            .entry(segment)
            .or_insert_with(|| MemorySegment {
                data: Vec::new(),
                complete: false,
                modified_at: Utc::now(),
            });
        entry.data.extend_from_slice(bytes);
        entry.modified_at = Utc::now();
    }

    /// Flag a segment as fully written. The flag never resets.
    pub fn mark_complete(&self, task_id: &TaskId, segment: SegmentId) {
        let mut guard = self.segments.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = guard.get_mut(task_id).and_then(|m| m.get_mut(&segment)) {
            s.complete = true;
        }
    }

    /// Readers handed out and not yet dropped.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn list_segments(&self, task_id: &TaskId) -> Result<Vec<LogSegment>, LogError> {
        let guard = self.segments.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(task_id)
            .map(|segments| {
                segments
                    .iter()
                    .map(|(id, s)| LogSegment {
                        task_id: task_id.clone(),
                        id: *id,
                        size: s.data.len() as u64,
                        complete: s.complete,
                        modified_at: Some(s.modified_at),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn open_segment(&self, segment: &LogSegment) -> Result<SegmentReader, LogError> {
        let snapshot = {
            let guard = self.segments.read().unwrap_or_else(PoisonError::into_inner);
            let stored = guard
                .get(&segment.task_id)
                .and_then(|m| m.get(&segment.id))
                .ok_or_else(|| segment_not_found(&segment.task_id, segment.id))?;
            Bytes::copy_from_slice(&stored.data)
        };
        Ok(Box::pin(CountedReader::new(
            Cursor::new(snapshot),
            Arc::clone(&self.open_readers),
        )))
    }
}

/// Reader that keeps the store's open-reader gauge accurate.
struct CountedReader {
    inner: Cursor<Bytes>,
    open: Arc<AtomicUsize>,
}

impl CountedReader {
    fn new(inner: Cursor<Bytes>, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { inner, open }
    }
}

impl Drop for CountedReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
