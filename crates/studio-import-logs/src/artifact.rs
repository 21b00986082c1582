//! The downloadable artifact handed to the HTTP layer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::Stream;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::assembler::{Assembly, Layout};
use crate::error::LogError;
use crate::types::{ImportTask, RequestPhase, TaskId};

/// `import-task-<id>-<status>-<YYYYMMDDHHMMSS>.<log|tar>`
pub fn artifact_filename(task: &ImportTask, layout: Layout, now: DateTime<Utc>) -> String {
    format!(
        "import-task-{}-{}-{}.{}",
        task.id,
        task.status,
        now.format("%Y%m%d%H%M%S"),
        layout.extension()
    )
}

/// One log download, ready to be written to a response.
#[derive(Debug)]
pub struct DownloadArtifact {
    pub filename: String,
    pub content_type: &'static str,
    /// Known up front for every layout the assembler produces.
    pub content_length: Option<u64>,
    pub layout: Layout,
    pub body: ArtifactBody,
}

impl DownloadArtifact {
    pub(crate) fn new(
        task: &ImportTask,
        assembly: Assembly,
        phase: watch::Sender<RequestPhase>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            filename: artifact_filename(task, assembly.layout, now),
            content_type: assembly.layout.content_type(),
            content_length: Some(assembly.content_length),
            layout: assembly.layout,
            body: ArtifactBody {
                inner: Some(assembly.body),
                phase,
                task_id: task.id.clone(),
                sent: 0,
            },
        }
    }

    /// Observe the request's progress through streaming.
    pub fn phase(&self) -> watch::Receiver<RequestPhase> {
        self.body.phase.subscribe()
    }
}

/// Byte stream of an artifact.
///
/// Tracks the request phase as bytes flow: the first non-empty chunk moves the
/// request to `Streaming`, the end of the stream to `Complete`, and a read
/// failure or an early drop (client went away) to `Failed`. Dropping the body
/// drops whichever segment reader is open.
pub struct ArtifactBody {
    inner: Option<BoxStream<'static, Result<Bytes, LogError>>>,
    phase: watch::Sender<RequestPhase>,
    task_id: TaskId,
    sent: u64,
}

impl std::fmt::Debug for ArtifactBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactBody")
            .field("task_id", &self.task_id)
            .field("sent", &self.sent)
            .field("phase", &*self.phase.borrow())
            .finish()
    }
}

impl ArtifactBody {
    /// Bytes yielded so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    fn advance(&self, next: RequestPhase) {
        let prev = self.phase.send_replace(next);
        debug!(task_id = %self.task_id, from = %prev, to = %next, "download phase");
    }
}

impl Stream for ArtifactBody {
    type Item = Result<Bytes, LogError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() && *this.phase.borrow() == RequestPhase::Assembling {
                    this.advance(RequestPhase::Streaming);
                }
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                // Headers are gone already; all that is left is to cut the
                // stream and leave a trace for operators.
                this.inner = None;
                match &e {
                    LogError::PartialReadFailure { segment, .. } => error!(
                        task_id = %this.task_id,
                        segment = %segment,
                        bytes_sent = this.sent,
                        error = %e,
                        "log download truncated"
                    ),
                    _ => error!(
                        task_id = %this.task_id,
                        bytes_sent = this.sent,
                        error = %e,
                        "log download truncated"
                    ),
                }
                this.advance(RequestPhase::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                this.advance(RequestPhase::Complete);
                info!(task_id = %this.task_id, bytes_sent = this.sent, "log download complete");
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for ArtifactBody {
    fn drop(&mut self) {
        if self.inner.take().is_some() && !self.phase.borrow().is_terminal() {
            info!(
                task_id = %self.task_id,
                bytes_sent = self.sent,
                "log download abandoned before completion"
            );
            self.advance(RequestPhase::Failed);
        }
    }
}
