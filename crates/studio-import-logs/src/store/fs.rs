//! Filesystem log store.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<task_id>/shard-<n>.log    segment bytes, appended by worker n
//! <root>/<task_id>/shard-<n>.done   empty marker, written once the worker finished
//! ```
//!
//! `<n>` is written without leading zeros, so every worker index maps to
//! exactly one file name. Padded names such as `shard-007.log` are skipped
//! with a warning. Anything else in a task directory is ignored. A task
//! directory that does not exist yet simply means no worker has written logs.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{LogStore, SegmentReader};
use crate::error::LogError;
use crate::types::{LogSegment, SegmentId, TaskId};

const SEGMENT_PREFIX: &str = "shard-";
const LOG_SUFFIX: &str = ".log";
const DONE_SUFFIX: &str = ".done";

#[derive(Debug, PartialEq, Eq)]
enum SegmentFile {
    Log(SegmentId),
    Done(SegmentId),
}

fn parse_segment_file(name: &str) -> Option<SegmentFile> {
    let rest = name.strip_prefix(SEGMENT_PREFIX)?;
    let (digits, done) = match rest.strip_suffix(LOG_SUFFIX) {
        Some(d) => (d, false),
        None => (rest.strip_suffix(DONE_SUFFIX)?, true),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = SegmentId(digits.parse().ok()?);
    // `open_segment` rebuilds the path from the ID.
    if digits != id.0.to_string() {
        return None;
    }
    Some(if done {
        SegmentFile::Done(id)
    } else {
        SegmentFile::Log(id)
    })
}

/// Reads segments from `<root>/<task_id>/`.
#[derive(Debug, Clone)]
pub struct FsLogStore {
    root: PathBuf,
}

impl FsLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.root.join(task_id.as_str())
    }

    fn segment_path(&self, task_id: &TaskId, id: SegmentId) -> PathBuf {
        self.task_dir(task_id)
            .join(format!("{SEGMENT_PREFIX}{}{LOG_SUFFIX}", id.0))
    }
}

#[async_trait]
impl LogStore for FsLogStore {
    async fn list_segments(&self, task_id: &TaskId) -> Result<Vec<LogSegment>, LogError> {
        let dir = self.task_dir(task_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Distinguish "no logs yet" from a missing or unmounted root.
                return match tokio::fs::metadata(&self.root).await {
                    Ok(meta) if meta.is_dir() => Ok(Vec::new()),
                    Ok(_) => Err(LogError::StorageUnavailable {
                        message: format!("log root {} is not a directory", self.root.display()),
                        source: None,
                    }),
                    Err(e) => Err(LogError::storage(
                        format!("log root {} is not reachable", self.root.display()),
                        e,
                    )),
                };
            }
            Err(e) => {
                return Err(LogError::storage(
                    format!("cannot list {}", dir.display()),
                    e,
                ))
            }
        };

        let mut logs: BTreeMap<SegmentId, LogSegment> = BTreeMap::new();
        let mut done: HashSet<SegmentId> = HashSet::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LogError::storage(format!("cannot list {}", dir.display()), e))?
        {
            let name = entry.file_name();
            let Some(kind) = name.to_str().and_then(parse_segment_file) else {
                if name.to_str().is_some_and(|n| {
                    n.starts_with(SEGMENT_PREFIX)
                        && (n.ends_with(LOG_SUFFIX) || n.ends_with(DONE_SUFFIX))
                }) {
                    warn!(
                        task_id = %task_id,
                        file = %entry.path().display(),
                        "skipping segment file with a non-canonical name"
                    );
                }
                continue;
            };
            match kind {
                SegmentFile::Done(id) => {
                    done.insert(id);
                }
                SegmentFile::Log(id) => {
                    let meta = match entry.metadata().await {
                        Ok(meta) if meta.is_file() => meta,
                        Ok(_) => continue,
                        // Removed between listing and stat.
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => {
                            return Err(LogError::storage(
                                format!("cannot stat {}", entry.path().display()),
                                e,
                            ))
                        }
                    };
                    logs.insert(
                        id,
                        LogSegment {
                            task_id: task_id.clone(),
                            id,
                            size: meta.len(),
                            complete: false,
                            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
                        },
                    );
                }
            }
        }

        for id in &done {
            if let Some(segment) = logs.get_mut(id) {
                segment.complete = true;
            }
        }

        debug!(task_id = %task_id, dir = %dir.display(), segments = logs.len(), "listed segment files");
        Ok(logs.into_values().collect())
    }

    async fn open_segment(&self, segment: &LogSegment) -> Result<SegmentReader, LogError> {
        let path = self.segment_path(&segment.task_id, segment.id);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|source| LogError::PartialReadFailure {
                task_id: segment.task_id.clone(),
                segment: segment.id,
                source,
            })?;
        Ok(Box::pin(file))
    }
}
