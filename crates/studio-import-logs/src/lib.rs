//! Import-task log retrieval and delivery.
//!
//! Locates the log segments written by the workers of a bulk-import task,
//! assembles them into a single downloadable artifact and streams it without
//! buffering the whole thing in memory.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | task lookup and segment enumeration (filesystem, in-memory) |
//! | [`assembler`] | raw / ustar framing of ordered segments |
//! | [`artifact`] | the streamed download and its request phase |
//! | [`logic`] | [`TaskLogService`], the entry point for the HTTP layer |

pub mod artifact;
pub mod assembler;
pub mod error;
pub mod logic;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use artifact::{ArtifactBody, DownloadArtifact};
pub use assembler::Layout;
pub use error::LogError;
pub use logic::{LogServiceConfig, TaskLogService};
pub use store::fs::FsLogStore;
pub use store::memory::{MemoryLogStore, MemoryTaskDirectory};
pub use store::{LogStore, SegmentReader, TaskDirectory};
pub use types::{
    DownloadLogsRequest, ImportTask, LogLines, LogSegment, RequestPhase, SegmentId, SegmentInfo,
    TaskId, TaskStatus,
};
