//! Resumable chunked upload engine.
//!
//! This crate implements the **transfer logic** for pushing large files
//! to S3-style multipart storage. It has no UI dependency; callers plug in
//! a [`ControlPlaneClient`] (the API that authorizes uploads and issues
//! part targets), a [`ChunkTransport`] (the data plane) and an
//! [`UploadStateStore`](bush_transfer::UploadStateStore).
//!
//! # Pipeline
//!
//! 1. **Plan**: split the file into fixed byte ranges
//! 2. **Register**: announce the file to the control plane
//! 3. **Init**: open a multipart session and fetch part targets
//! 4. **Transfer**: push parts concurrently with per-part retry
//! 5. **Complete**: hand the sorted part tokens back to the control plane
//!
//! State is persisted after every step so an interrupted upload can be
//! resumed from its last acknowledged part.

use std::future::Future;
use std::pin::Pin;

pub mod control_plane;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod session;
pub mod shared;
pub mod source;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience.
pub use control_plane::ControlPlaneClient;
pub use coordinator::{ChunkTransferCoordinator, CoordinatorConfig};
pub use error::{FailedChunk, UploadError};
pub use http::{HttpChunkTransport, HttpControlPlane};
pub use session::TransferSession;
pub use source::{FileSource, MemorySource, UploadSource, detect_mime_type};
pub use transport::ChunkTransport;
pub use types::{
    EngineConfig, PartReceipt, PartTarget, RegisteredUpload, RemoteFile, UploadCallbacks,
    UploadDescriptor, UploadOptions,
};

pub use bush_transfer::{UploadProgress, UploadSession, UploadStatus};

/// Boxed, sendable future used at every async trait seam of the engine.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
