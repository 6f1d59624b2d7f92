//! Wire types shared by the upload engine, its HTTP adapters and the CLI.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    CompleteMultipartRequest, CompletedPartEntry, InitMultipartRequest, InitMultipartResponse,
    PartTargetEntry, PartTargetsRequest, PartTargetsResponse, RegisterUploadRequest,
    RegisterUploadResponse,
};
pub use types::{ChunkStatus, UploadStatus};
