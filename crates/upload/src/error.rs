//! Upload error types.

use std::fmt;

use bush_protocol::UploadStatus;
use bush_transfer::StoreError;

/// A chunk that failed on every allowed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunk {
    pub part_number: u32,
    pub attempts: u32,
    pub last_error: String,
}

impl fmt::Display for FailedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "part {} after {} attempt(s): {}",
            self.part_number, self.attempts, self.last_error
        )
    }
}

fn describe_failed(failed: &[FailedChunk]) -> String {
    failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("cannot {operation} upload {id} while {status}")]
    InvalidState {
        id: String,
        status: UploadStatus,
        operation: &'static str,
    },

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("part {part_number} response carried no integrity token")]
    Integrity { part_number: u32 },

    #[error("{} chunk(s) exhausted their retries: {}", .failed.len(), describe_failed(.failed))]
    ExhaustedRetries { failed: Vec<FailedChunk> },

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("paused")]
    Paused,

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Returns `true` for failures a chunk may retry locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Integrity { .. } | Self::Io(_)
        )
    }
}
