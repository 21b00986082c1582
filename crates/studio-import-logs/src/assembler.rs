//! Log Assembler.
//!
//! Turns an ordered list of segments into the byte stream of a download:
//!
//! - no segment: an empty body;
//! - one segment: the raw segment bytes;
//! - several segments: a ustar archive with one `shard-NNNNN.log` entry per
//!   segment, in ascending segment order.
//!
//! Every segment is read up to the size recorded at enumeration, so the
//! total length is known before the first byte and workers appending in the
//! meantime cannot shift it. Segments are opened one at a time; only the
//! first one is opened up front so that an unreadable log surfaces as an
//! error response instead of a truncated body.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use tokio::io::AsyncReadExt;

use crate::error::LogError;
use crate::store::{LogStore, SegmentReader};
use crate::types::LogSegment;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar";

/// Default size of one read from a segment.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

const BLOCK: u64 = 512;
static TRAILER: [u8; 1024] = [0; 1024];

/// Shape of the assembled artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Empty,
    Raw,
    Archive,
}

impl Layout {
    pub fn content_type(self) -> &'static str {
        match self {
            Layout::Empty | Layout::Raw => TEXT_CONTENT_TYPE,
            Layout::Archive => ARCHIVE_CONTENT_TYPE,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Layout::Empty | Layout::Raw => "log",
            Layout::Archive => "tar",
        }
    }
}

/// An assembled, not yet consumed, artifact body.
pub struct Assembly {
    pub layout: Layout,
    /// Exact number of bytes `body` yields when nothing fails.
    pub content_length: u64,
    /// Ends right after the first error it yields.
    pub body: BoxStream<'static, Result<Bytes, LogError>>,
}

impl std::fmt::Debug for Assembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembly")
            .field("layout", &self.layout)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Assembler {
    store: Arc<dyn LogStore>,
    chunk_bytes: usize,
}

impl Assembler {
    pub fn new(store: Arc<dyn LogStore>, chunk_bytes: usize) -> Self {
        Self {
            store,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    pub async fn assemble(&self, mut segments: Vec<LogSegment>) -> Result<Assembly, LogError> {
        segments.sort_by_key(|s| s.id);

        if segments.is_empty() {
            return Ok(Assembly {
                layout: Layout::Empty,
                content_length: 0,
                body: stream::empty().boxed(),
            });
        }

        let first = self.store.open_segment(&segments[0]).await?;

        if segments.len() == 1 {
            let segment = segments.remove(0);
            let content_length = segment.size;
            let body = segment_bytes(segment, Source::Open(first), self.chunk_bytes);
            return Ok(Assembly {
                layout: Layout::Raw,
                content_length,
                body: stop_after_error(body.boxed()),
            });
        }

        let content_length = archive_length(&segments);
        let mut entries = Vec::with_capacity(segments.len());
        let mut first = Some(first);
        for segment in segments {
            let header = entry_header(&segment)?;
            let source = match first.take() {
                Some(reader) => Source::Open(reader),
                None => Source::Deferred(Arc::clone(&self.store)),
            };
            entries.push((segment, header, source));
        }

        let chunk_bytes = self.chunk_bytes;
        let body = stream::iter(entries)
            .flat_map(move |(segment, header, source)| {
                let pad = padding(segment.size);
                stream::once(future::ready(Ok(header)))
                    .chain(segment_bytes(segment, source, chunk_bytes))
                    .chain(stream::iter(
                        (pad > 0).then(|| Ok(Bytes::from(vec![0u8; pad as usize]))),
                    ))
            })
            .chain(stream::once(future::ready(Ok(Bytes::from_static(&TRAILER)))));

        Ok(Assembly {
            layout: Layout::Archive,
            content_length,
            body: stop_after_error(body.boxed()),
        })
    }
}

/// Exact ustar size for `segments`: header + padded data per entry, plus the
/// two zero blocks closing the archive.
pub fn archive_length(segments: &[LogSegment]) -> u64 {
    segments
        .iter()
        .map(|s| BLOCK + s.size + padding(s.size))
        .sum::<u64>()
        + TRAILER.len() as u64
}

fn padding(size: u64) -> u64 {
    (BLOCK - size % BLOCK) % BLOCK
}

fn entry_header(segment: &LogSegment) -> Result<Bytes, LogError> {
    let mut header = tar::Header::new_ustar();
    header.set_path(segment.id.entry_name()).map_err(|e| {
        LogError::storage(format!("cannot name archive entry for segment {}", segment.id), e)
    })?;
    header.set_size(segment.size);
    header.set_mode(0o644);
    header.set_mtime(
        segment
            .modified_at
            .map(|t| t.timestamp().max(0) as u64)
            .unwrap_or(0),
    );
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    Ok(Bytes::copy_from_slice(header.as_bytes()))
}

enum Source {
    Open(SegmentReader),
    Deferred(Arc<dyn LogStore>),
}

struct SegmentRead {
    segment: LogSegment,
    source: Source,
    remaining: u64,
    chunk_bytes: usize,
}

/// Chunks of `segment`, bounded by its enumerated size.
///
/// The reader lives inside the stream state, so dropping the stream closes it.
fn segment_bytes(
    segment: LogSegment,
    source: Source,
    chunk_bytes: usize,
) -> impl futures::Stream<Item = Result<Bytes, LogError>> + Send + 'static {
    let state = SegmentRead {
        remaining: segment.size,
        segment,
        source,
        chunk_bytes,
    };
    stream::try_unfold(state, |mut st| async move {
        if st.remaining == 0 {
            return Ok(None);
        }

        if let Source::Deferred(store) = &st.source {
            let reader = store
                .open_segment(&st.segment)
                .await
                .map_err(|e| mid_stream(&st.segment, e))?;
            st.source = Source::Open(reader);
        }
        let Source::Open(reader) = &mut st.source else {
            return Ok(None);
        };

        let want = st.remaining.min(st.chunk_bytes as u64) as usize;
        let mut buf = vec![0u8; want];
        let read = reader.read(&mut buf).await;
        let n = match read {
            Ok(0) => {
                return Err(read_failure(
                    &st.segment,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "segment ended {} bytes short of its enumerated size",
                            st.remaining
                        ),
                    ),
                ))
            }
            Ok(n) => n,
            Err(e) => return Err(read_failure(&st.segment, e)),
        };
        buf.truncate(n);
        st.remaining -= n as u64;
        Ok(Some((Bytes::from(buf), st)))
    })
}

fn read_failure(segment: &LogSegment, source: std::io::Error) -> LogError {
    LogError::PartialReadFailure {
        task_id: segment.task_id.clone(),
        segment: segment.id,
        source,
    }
}

/// Once bytes may have been sent, every failure is a partial read.
fn mid_stream(segment: &LogSegment, err: LogError) -> LogError {
    match err {
        e @ LogError::PartialReadFailure { .. } => e,
        other => read_failure(segment, std::io::Error::other(other.to_string())),
    }
}

/// Yield items up to and including the first error, then end.
fn stop_after_error(
    body: BoxStream<'static, Result<Bytes, LogError>>,
) -> BoxStream<'static, Result<Bytes, LogError>> {
    body.scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        *failed = item.is_err();
        future::ready(Some(item))
    })
    .boxed()
}
