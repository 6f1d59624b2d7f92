//! Chunk planning, upload session records and resumable state persistence.
//!
//! Everything in here is transport-agnostic: the upload engine in
//! `bush-upload` drives these types, and any caller can inspect them.

mod chunked;
mod progress;
mod store;
mod types;
mod validation;

pub use chunked::{checksum_bytes, plan_chunks, read_range, total_chunks};
pub use progress::{ThroughputMeter, UploadProgress};
pub use store::{JsonFileStateStore, MemoryStateStore, StoreFuture, UploadStateStore};
pub use types::{ChunkMetadata, CompletedPart, FileDescriptor, UploadSession};
pub use validation::validate_session_id;

pub use bush_protocol::{ChunkStatus, UploadStatus};

/// Default chunk size: 8 MiB.
///
/// Comfortably above the 5 MiB minimum part size of S3-style multipart
/// backends while keeping per-part retries cheap.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Errors produced by upload state stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session id: {0}")]
    InvalidId(String),
}
