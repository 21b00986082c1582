//! Task Log Logic.
//!
//! Entry point used by the HTTP adapter. Each download walks
//! `Received → Resolved → Assembling → Streaming → Complete | Failed`;
//! everything up to `Assembling` happens before the adapter writes a single
//! byte, so lookup and storage failures still become error responses.

use std::io;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::artifact::DownloadArtifact;
use crate::assembler::{Assembler, Assembly, DEFAULT_CHUNK_BYTES};
use crate::error::LogError;
use crate::store::{segment_not_found, LogAccessor, LogStore, TaskDirectory};
use crate::types::{
    DownloadLogsRequest, ImportTask, LogLines, RequestPhase, SegmentId, SegmentInfo, TaskId,
};

/// Default (and hard) cap on lines returned by one [`TaskLogService::read_lines`] call.
pub const DEFAULT_MAX_LINES: usize = 1000;

/// Bytes kept of a single line; the rest of the line is skipped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct LogServiceConfig {
    /// Size of one read from a segment while streaming.
    pub read_chunk_bytes: usize,
    /// Upper bound for a page of lines.
    pub max_lines: usize,
    /// Longer lines are cut to this many bytes in a page.
    pub max_line_bytes: usize,
}

impl Default for LogServiceConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: DEFAULT_CHUNK_BYTES,
            max_lines: DEFAULT_MAX_LINES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Orchestrates task resolution, segment enumeration and assembly.
#[derive(Clone, Debug)]
pub struct TaskLogService {
    accessor: LogAccessor,
    config: LogServiceConfig,
}

impl TaskLogService {
    pub fn new(
        tasks: Arc<dyn TaskDirectory>,
        store: Arc<dyn LogStore>,
        config: LogServiceConfig,
    ) -> Self {
        Self {
            accessor: LogAccessor::new(tasks, store),
            config,
        }
    }

    pub fn config(&self) -> &LogServiceConfig {
        &self.config
    }

    /// Look up a task.
    pub async fn task(&self, task_id: &TaskId) -> Result<ImportTask, LogError> {
        self.accessor.resolve(task_id).await
    }

    /// Build the download artifact for `request`.
    ///
    /// Zero segments is a successful, empty artifact. Errors returned here
    /// happen before any byte is produced; failures while streaming surface
    /// through the artifact's body instead.
    pub async fn download_logs(
        &self,
        request: &DownloadLogsRequest,
    ) -> Result<DownloadArtifact, LogError> {
        let (phase, _) = watch::channel(RequestPhase::Received);
        let task_id = &request.task_id;

        match self.prepare(request, &phase).await {
            Ok((task, assembly)) => {
                info!(
                    task_id = %task_id,
                    status = %task.status,
                    layout = ?assembly.layout,
                    content_length = assembly.content_length,
                    "log download ready"
                );
                Ok(DownloadArtifact::new(&task, assembly, phase, Utc::now()))
            }
            Err(e) => {
                phase.send_replace(RequestPhase::Failed);
                warn!(task_id = %task_id, kind = e.kind(), error = %e, "log download failed");
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        request: &DownloadLogsRequest,
        phase: &watch::Sender<RequestPhase>,
    ) -> Result<(ImportTask, Assembly), LogError> {
        let task = self.accessor.resolve(&request.task_id).await?;
        set_phase(phase, &task.id, RequestPhase::Resolved);

        let mut segments = self.accessor.segments(&task).await?;
        if let Some(wanted) = request.segment {
            segments.retain(|s| s.id == wanted);
            if segments.is_empty() {
                return Err(segment_not_found(&task.id, wanted));
            }
        }
        set_phase(phase, &task.id, RequestPhase::Assembling);

        let assembler = Assembler::new(self.accessor.store(), self.config.read_chunk_bytes);
        let assembly = assembler.assemble(segments).await?;
        Ok((task, assembly))
    }

    /// Segments of a task, for log browsing.
    pub async fn list_segments(&self, task_id: &TaskId) -> Result<Vec<SegmentInfo>, LogError> {
        let task = self.accessor.resolve(task_id).await?;
        let segments = self.accessor.segments(&task).await?;
        Ok(segments.iter().map(SegmentInfo::from).collect())
    }

    /// A page of lines from one segment.
    ///
    /// `offset` counts lines from the start of the segment. `limit` defaults
    /// to, and is capped at, the configured maximum. Only bytes present when
    /// the segment was enumerated are considered, so a trailing line that a
    /// worker is still writing may come back partial. Lines longer than
    /// `max_line_bytes` are cut and the page is flagged `truncated`.
    pub async fn read_lines(
        &self,
        task_id: &TaskId,
        segment: SegmentId,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<LogLines, LogError> {
        let limit = match limit {
            Some(0) => {
                return Err(LogError::InvalidRequest("limit must be at least 1".into()));
            }
            Some(n) => n.min(self.config.max_lines),
            None => self.config.max_lines,
        };

        let segment = self.accessor.segment(task_id, segment).await?;
        let reader = self.accessor.open(&segment).await?;
        let mut reader = BufReader::new(reader.take(segment.size));

        let read_err = |source| LogError::PartialReadFailure {
            task_id: segment.task_id.clone(),
            segment: segment.id,
            source,
        };

        let mut lines = Vec::new();
        let mut buf = Vec::new();
        let mut index = 0usize;
        let mut has_more = false;
        let mut truncated = false;
        let max_line_bytes = self.config.max_line_bytes.max(1);
        loop {
            buf.clear();
            let Some(cut) = read_capped_line(&mut reader, &mut buf, max_line_bytes)
                .await
                .map_err(read_err)?
            else {
                break;
            };
            if index >= offset {
                if lines.len() == limit {
                    has_more = true;
                    break;
                }
                truncated |= cut;
                lines.push(decode_line(&buf));
            }
            index += 1;
        }

        debug!(
            task_id = %task_id,
            segment = %segment.id,
            offset,
            returned = lines.len(),
            has_more,
            truncated,
            "read log lines"
        );
        Ok(LogLines {
            segment: segment.id,
            offset,
            lines,
            has_more,
            truncated,
        })
    }
}

fn set_phase(phase: &watch::Sender<RequestPhase>, task_id: &TaskId, next: RequestPhase) {
    let prev = phase.send_replace(next);
    debug!(task_id = %task_id, from = %prev, to = %next, "download phase");
}

/// Reads one line into `buf`, keeping at most `cap` bytes of it.
///
/// Returns `None` at end of input, otherwise whether the line was cut.
async fn read_capped_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cap: usize,
) -> io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    let mut read_any = false;
    let mut cut = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any.then_some(cut));
        }
        let (used, end_of_line) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        let keep = used.min(cap.saturating_sub(buf.len()));
        buf.extend_from_slice(&available[..keep]);
        // A dropped newline alone does not count as a cut.
        if keep < used && !(end_of_line && keep == used - 1) {
            cut = true;
        }
        reader.consume(used);
        read_any = true;
        if end_of_line {
            return Ok(Some(cut));
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
