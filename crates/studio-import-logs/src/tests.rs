//! End-to-end scenarios for [`TaskLogService`]: resolution, assembly and
//! streaming against in-memory, filesystem and fault-injecting stores.

use std::io::Read;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tracing_test::traced_test;

use crate::assembler::{ARCHIVE_CONTENT_TYPE, TEXT_CONTENT_TYPE};
use crate::store::{LogStore, SegmentReader};
use crate::{
    DownloadArtifact, DownloadLogsRequest, FsLogStore, ImportTask, Layout, LogError,
    LogSegment, LogServiceConfig, MemoryLogStore, MemoryTaskDirectory, RequestPhase, SegmentId,
    TaskId, TaskLogService, TaskStatus,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

struct Fixture {
    tasks: Arc<MemoryTaskDirectory>,
    store: Arc<MemoryLogStore>,
    service: TaskLogService,
}

fn fixture(chunk: usize) -> Fixture {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let store = Arc::new(MemoryLogStore::new());
    let service = TaskLogService::new(
        tasks.clone(),
        store.clone(),
        LogServiceConfig {
            read_chunk_bytes: chunk,
            max_lines: 5,
            max_line_bytes: 16,
        },
    );
    Fixture {
        tasks,
        store,
        service,
    }
}

fn task_id(raw: &str) -> TaskId {
    TaskId::parse(raw).unwrap()
}

fn request(raw: &str) -> DownloadLogsRequest {
    DownloadLogsRequest {
        task_id: task_id(raw),
        segment: None,
    }
}

/// Drain the body; returns the bytes delivered and the error that ended it, if any.
async fn drain(artifact: DownloadArtifact) -> (Vec<u8>, Option<LogError>) {
    let mut body = artifact.body;
    let mut bytes = Vec::new();
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(e) => {
                assert!(body.next().await.is_none(), "no item may follow an error");
                return (bytes, Some(e));
            }
        }
    }
    (bytes, None)
}

fn tar_entries(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            (name, body)
        })
        .collect()
}

/// Wraps a memory store: lists segments in reverse and can break one of them.
struct FaultyStore {
    inner: Arc<MemoryLogStore>,
    /// (segment, bytes delivered before the reader errors)
    fail: Option<(SegmentId, usize)>,
    /// Segment whose open itself fails.
    refuse: Option<SegmentId>,
    unavailable: bool,
    opened: Arc<AtomicUsize>,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryLogStore>) -> Self {
        Self {
            inner,
            fail: None,
            refuse: None,
            unavailable: false,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl LogStore for FaultyStore {
    async fn list_segments(&self, task_id: &TaskId) -> Result<Vec<LogSegment>, LogError> {
        if self.unavailable {
            return Err(LogError::StorageUnavailable {
                message: "object store unreachable".into(),
                source: None,
            });
        }
        let mut segments = self.inner.list_segments(task_id).await?;
        segments.reverse();
        Ok(segments)
    }

    async fn open_segment(&self, segment: &LogSegment) -> Result<SegmentReader, LogError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.refuse == Some(segment.id) {
            return Err(LogError::PartialReadFailure {
                task_id: segment.task_id.clone(),
                segment: segment.id,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
            });
        }
        match self.fail {
            Some((id, after)) if id == segment.id => {
                let mut data = Vec::new();
                let mut reader = self.inner.open_segment(segment).await?;
                tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut data)
                    .await
                    .unwrap();
                Ok(Box::pin(FailAfter {
                    data: Bytes::from(data),
                    pos: 0,
                    fail_at: after,
                }))
            }
            _ => self.inner.open_segment(segment).await,
        }
    }
}

struct FailAfter {
    data: Bytes,
    pos: usize,
    fail_at: usize,
}

impl AsyncRead for FailAfter {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let limit = self.fail_at.min(self.data.len());
        if self.pos >= limit {
            return Poll::Ready(Err(std::io::Error::other("disk went away")));
        }
        let n = (limit - self.pos).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

// ── Layouts ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_segments_is_an_empty_success() {
    let fx = fixture(64);
    fx.tasks.insert(ImportTask::new(task_id("quiet"), TaskStatus::Pending));

    let artifact = fx.service.download_logs(&request("quiet")).await.unwrap();
    assert_eq!(artifact.layout, Layout::Empty);
    assert_eq!(artifact.content_type, TEXT_CONTENT_TYPE);
    assert_eq!(artifact.content_length, Some(0));

    let phase = artifact.phase();
    let (bytes, err) = drain(artifact).await;
    assert!(bytes.is_empty());
    assert!(err.is_none());
    assert_eq!(*phase.borrow(), RequestPhase::Complete);
}

#[tokio::test]
async fn single_segment_is_delivered_verbatim() {
    let fx = fixture(7);
    let task = fx.tasks.insert(ImportTask::new(task_id("one"), TaskStatus::Succeeded));
    let content = b"2024-01-01 start\n2024-01-01 loaded 10 vertices\n2024-01-01 done\n";
    fx.store.append(&task.id, SegmentId(0), content);
    fx.store.mark_complete(&task.id, SegmentId(0));

    let artifact = fx.service.download_logs(&request("one")).await.unwrap();
    assert_eq!(artifact.layout, Layout::Raw);
    assert_eq!(artifact.content_type, TEXT_CONTENT_TYPE);
    assert_eq!(artifact.content_length, Some(content.len() as u64));
    assert!(artifact.filename.starts_with("import-task-one-succeeded-"));
    assert!(artifact.filename.ends_with(".log"));

    let (bytes, err) = drain(artifact).await;
    assert!(err.is_none());
    assert_eq!(bytes, content);
}

#[tokio::test]
async fn many_segments_become_an_ordered_archive() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let memory = Arc::new(MemoryLogStore::new());
    let task = tasks.insert(ImportTask::new(task_id("wide"), TaskStatus::Running));
    for shard in [4u32, 1, 9, 0] {
        memory.append(&task.id, SegmentId(shard), format!("worker {shard}\n").as_bytes());
    }
    // The faulty store (with no fault) lists segments in reverse order.
    let store = Arc::new(FaultyStore::new(memory));
    let service = TaskLogService::new(tasks, store, LogServiceConfig::default());

    let artifact = service.download_logs(&request("wide")).await.unwrap();
    assert_eq!(artifact.layout, Layout::Archive);
    assert_eq!(artifact.content_type, ARCHIVE_CONTENT_TYPE);
    assert!(artifact.filename.ends_with(".tar"));
    let declared = artifact.content_length.unwrap();

    let (bytes, err) = drain(artifact).await;
    assert!(err.is_none());
    assert_eq!(bytes.len() as u64, declared);
    assert_eq!(
        tar_entries(&bytes),
        vec![
            ("shard-00000.log".to_owned(), "worker 0\n".to_owned()),
            ("shard-00001.log".to_owned(), "worker 1\n".to_owned()),
            ("shard-00004.log".to_owned(), "worker 4\n".to_owned()),
            ("shard-00009.log".to_owned(), "worker 9\n".to_owned()),
        ]
    );
}

#[tokio::test]
async fn repeated_downloads_name_entries_identically() {
    let fx = fixture(64);
    let task = fx.tasks.insert(ImportTask::new(task_id("again"), TaskStatus::Succeeded));
    fx.store.append(&task.id, SegmentId(2), b"b\n");
    fx.store.append(&task.id, SegmentId(1), b"a\n");

    let first = drain(fx.service.download_logs(&request("again")).await.unwrap()).await.0;
    let second = drain(fx.service.download_logs(&request("again")).await.unwrap()).await.0;
    assert_eq!(first, second);
}

#[tokio::test]
async fn selecting_a_segment_returns_only_that_segment() {
    let fx = fixture(64);
    let task = fx.tasks.insert(ImportTask::new(task_id("pick"), TaskStatus::Failed));
    fx.store.append(&task.id, SegmentId(0), b"zero\n");
    fx.store.append(&task.id, SegmentId(1), b"one\n");

    let req = DownloadLogsRequest {
        task_id: task.id.clone(),
        segment: Some(SegmentId(1)),
    };
    let artifact = fx.service.download_logs(&req).await.unwrap();
    assert_eq!(artifact.layout, Layout::Raw);
    assert_eq!(drain(artifact).await.0, b"one\n");

    let missing = DownloadLogsRequest {
        task_id: task.id.clone(),
        segment: Some(SegmentId(5)),
    };
    let err = fx.service.download_logs(&missing).await.unwrap_err();
    assert!(matches!(err, LogError::NotFound(_)));
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_task_is_not_found_even_when_storage_is_down() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let mut store = FaultyStore::new(Arc::new(MemoryLogStore::new()));
    store.unavailable = true;
    let service = TaskLogService::new(tasks, Arc::new(store), LogServiceConfig::default());

    let err = service.download_logs(&request("ghost")).await.unwrap_err();
    assert!(matches!(err, LogError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_storage_is_reported_before_streaming() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    tasks.insert(ImportTask::new(task_id("t"), TaskStatus::Running));
    let mut store = FaultyStore::new(Arc::new(MemoryLogStore::new()));
    store.unavailable = true;
    let service = TaskLogService::new(tasks, Arc::new(store), LogServiceConfig::default());

    let err = service.download_logs(&request("t")).await.unwrap_err();
    assert!(matches!(err, LogError::StorageUnavailable { .. }), "{err:?}");
}

#[tokio::test]
#[traced_test]
async fn read_failure_after_500_bytes_truncates_cleanly() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let memory = Arc::new(MemoryLogStore::new());
    let task = tasks.insert(ImportTask::new(task_id("flaky"), TaskStatus::Running));
    let content: Vec<u8> = (0..2000u32).map(|i| b'a' + (i % 26) as u8).collect();
    memory.append(&task.id, SegmentId(3), &content);

    let mut store = FaultyStore::new(memory);
    store.fail = Some((SegmentId(3), 500));
    let service = TaskLogService::new(
        tasks,
        Arc::new(store),
        LogServiceConfig {
            read_chunk_bytes: 128,
            ..LogServiceConfig::default()
        },
    );

    let artifact = service.download_logs(&request("flaky")).await.unwrap();
    assert_eq!(artifact.content_length, Some(2000));
    let phase = artifact.phase();

    let (bytes, err) = drain(artifact).await;
    assert_eq!(bytes, &content[..500]);
    assert!(matches!(
        err,
        Some(LogError::PartialReadFailure { segment: SegmentId(3), .. })
    ));
    assert_eq!(*phase.borrow(), RequestPhase::Failed);
    assert!(logs_contain("log download truncated"));
    assert!(logs_contain("flaky"));
}

#[tokio::test]
async fn later_segment_failure_leaves_a_valid_prefix() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let memory = Arc::new(MemoryLogStore::new());
    let task = tasks.insert(ImportTask::new(task_id("split"), TaskStatus::Running));
    memory.append(&task.id, SegmentId(0), b"good shard\n");
    memory.append(&task.id, SegmentId(1), b"bad shard\n");

    let mut store = FaultyStore::new(memory);
    store.fail = Some((SegmentId(1), 0));
    let service = TaskLogService::new(tasks, Arc::new(store), LogServiceConfig::default());

    let artifact = service.download_logs(&request("split")).await.unwrap();
    let declared = artifact.content_length.unwrap();
    let (bytes, err) = drain(artifact).await;

    assert!(matches!(
        err,
        Some(LogError::PartialReadFailure { segment: SegmentId(1), .. })
    ));
    // First entry (header + padded data) and the second entry's header.
    assert_eq!(bytes.len(), 512 + 512 + 512);
    assert!((bytes.len() as u64) < declared);
    assert_eq!(&bytes[512..523], b"good shard\n");
}

#[tokio::test]
async fn unreadable_first_segment_fails_before_streaming() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let memory = Arc::new(MemoryLogStore::new());
    let task = tasks.insert(ImportTask::new(task_id("locked"), TaskStatus::Succeeded));
    memory.append(&task.id, SegmentId(0), b"a\n");
    memory.append(&task.id, SegmentId(1), b"b\n");

    let mut store = FaultyStore::new(memory);
    store.refuse = Some(SegmentId(0));
    let service = TaskLogService::new(tasks, Arc::new(store), LogServiceConfig::default());

    let err = service.download_logs(&request("locked")).await.unwrap_err();
    assert!(matches!(
        err,
        LogError::PartialReadFailure { segment: SegmentId(0), .. }
    ));
}

// ── Resources ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelling_mid_stream_releases_readers() {
    let fx = fixture(16);
    let task = fx.tasks.insert(ImportTask::new(task_id("big"), TaskStatus::Running));
    fx.store.append(&task.id, SegmentId(0), &[b'x'; 4096]);
    fx.store.append(&task.id, SegmentId(1), &[b'y'; 4096]);

    let mut artifact = fx.service.download_logs(&request("big")).await.unwrap();
    let phase = artifact.phase();
    let first = artifact.body.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    assert_eq!(*phase.borrow(), RequestPhase::Streaming);
    assert_eq!(fx.store.open_readers(), 1);

    drop(artifact);
    assert_eq!(fx.store.open_readers(), 0);
    assert_eq!(*phase.borrow(), RequestPhase::Failed);
}

#[tokio::test]
async fn segments_are_opened_one_at_a_time() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    let memory = Arc::new(MemoryLogStore::new());
    let task = tasks.insert(ImportTask::new(task_id("lazy"), TaskStatus::Succeeded));
    for shard in 0..3 {
        memory.append(&task.id, SegmentId(shard), b"data\n");
    }
    let store = Arc::new(FaultyStore::new(memory.clone()));
    let opened = store.opened.clone();
    let service = TaskLogService::new(tasks, store, LogServiceConfig::default());

    let mut artifact = service.download_logs(&request("lazy")).await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 1, "only the first segment is opened eagerly");

    let mut max_open = 0;
    while let Some(chunk) = artifact.body.next().await {
        chunk.unwrap();
        max_open = max_open.max(memory.open_readers());
    }
    assert_eq!(max_open, 1);
    assert_eq!(opened.load(Ordering::SeqCst), 3);
    assert_eq!(memory.open_readers(), 0);
}

#[tokio::test]
async fn concurrent_appends_never_reorder_bytes() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    tasks.insert(ImportTask::new(task_id("live"), TaskStatus::Running));
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("live");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("shard-0.log");
    std::fs::write(&path, b"").unwrap();

    let service = TaskLogService::new(
        tasks,
        Arc::new(FsLogStore::new(root.path())),
        LogServiceConfig {
            read_chunk_bytes: 256,
            ..LogServiceConfig::default()
        },
    );

    let writer_path = path.clone();
    let writer = tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(writer_path)
            .unwrap();
        for i in 0..2000 {
            writeln!(file, "line-{i:06}").unwrap();
        }
    });

    let mut readers = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        readers.push(tokio::spawn(async move {
            let mut snapshots = Vec::new();
            for _ in 0..10 {
                let artifact = service.download_logs(&request("live")).await.unwrap();
                let (bytes, err) = drain(artifact).await;
                assert!(err.is_none());
                snapshots.push(bytes);
                tokio::task::yield_now().await;
            }
            snapshots
        }));
    }

    writer.await.unwrap();
    let full = std::fs::read(&path).unwrap();
    for reader in readers {
        for snapshot in reader.await.unwrap() {
            assert!(full.starts_with(&snapshot), "snapshot must be a prefix of the log");
        }
    }
}

#[tokio::test]
async fn filesystem_listing_only_offers_openable_segments() {
    let tasks = Arc::new(MemoryTaskDirectory::new());
    tasks.insert(ImportTask::new(task_id("padded"), TaskStatus::Succeeded));
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("padded");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("shard-0012.log"), b"hello\n").unwrap();
    std::fs::write(dir.join("shard-3.log"), b"three\n").unwrap();

    let service = TaskLogService::new(
        tasks,
        Arc::new(FsLogStore::new(root.path())),
        LogServiceConfig::default(),
    );

    let listed = service.list_segments(&task_id("padded")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].segment, SegmentId(3));

    let artifact = service.download_logs(&request("padded")).await.unwrap();
    assert_eq!(artifact.layout, Layout::Raw);
    let (bytes, err) = drain(artifact).await;
    assert!(err.is_none());
    assert_eq!(bytes, b"three\n");
}

// ── Browsing ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_segments_reports_size_and_completion() {
    let fx = fixture(64);
    let task = fx.tasks.insert(ImportTask::new(task_id("ls"), TaskStatus::Running));
    fx.store.append(&task.id, SegmentId(1), b"12345");
    fx.store.append(&task.id, SegmentId(0), b"1");
    fx.store.mark_complete(&task.id, SegmentId(0));

    let listed = fx.service.list_segments(&task.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, "shard-00000.log");
    assert!(listed[0].complete);
    assert_eq!(listed[1].size, 5);
    assert!(!listed[1].complete);

    let err = fx.service.list_segments(&task_id("nope")).await.unwrap_err();
    assert!(matches!(err, LogError::NotFound(_)));
}

#[tokio::test]
async fn read_lines_pages_through_a_segment() {
    let fx = fixture(64);
    let task = fx.tasks.insert(ImportTask::new(task_id("page"), TaskStatus::Succeeded));
    let text: String = (0..12).map(|i| format!("row {i}\n")).collect();
    fx.store.append(&task.id, SegmentId(0), text.as_bytes());

    let page = fx
        .service
        .read_lines(&task.id, SegmentId(0), 2, Some(3))
        .await
        .unwrap();
    assert_eq!(page.lines, vec!["row 2", "row 3", "row 4"]);
    assert!(page.has_more);

    // max_lines is 5 in the fixture.
    let capped = fx
        .service
        .read_lines(&task.id, SegmentId(0), 0, Some(100))
        .await
        .unwrap();
    assert_eq!(capped.lines.len(), 5);

    let tail = fx
        .service
        .read_lines(&task.id, SegmentId(0), 10, None)
        .await
        .unwrap();
    assert_eq!(tail.lines, vec!["row 10", "row 11"]);
    assert!(!tail.has_more);

    let err = fx
        .service
        .read_lines(&task.id, SegmentId(0), 0, Some(0))
        .await
        .unwrap_err();
    assert!(matches!(err, LogError::InvalidRequest(_)));
}

#[tokio::test]
async fn read_lines_cuts_a_segment_without_newlines() {
    let fx = fixture(64);
    let task = fx.tasks.insert(ImportTask::new(task_id("wide"), TaskStatus::Running));
    fx.store.append(&task.id, SegmentId(0), &vec![b'x'; 100_000]);
    fx.store.append(&task.id, SegmentId(1), b"ok\n");

    // max_line_bytes is 16 in the fixture.
    let page = fx
        .service
        .read_lines(&task.id, SegmentId(0), 0, None)
        .await
        .unwrap();
    assert_eq!(page.lines, vec!["x".repeat(16)]);
    assert!(page.truncated);
    assert!(!page.has_more);

    let page = fx
        .service
        .read_lines(&task.id, SegmentId(1), 0, None)
        .await
        .unwrap();
    assert_eq!(page.lines, vec!["ok"]);
    assert!(!page.truncated);
}
