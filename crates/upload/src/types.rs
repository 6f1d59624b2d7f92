//! Data types for the upload engine.

use std::fmt;
use std::sync::Arc;

use bush_transfer::{DEFAULT_CHUNK_SIZE, FileDescriptor, UploadProgress, UploadSession};

use crate::error::UploadError;

/// Engine-wide transfer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bytes per chunk for new sessions.
    pub chunk_size: u64,
    /// Maximum concurrent chunk transfers per session.
    pub max_parallel: usize,
    /// Retries allowed per chunk after its first attempt.
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallel: 4,
            max_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::Validation("chunk size must be positive".into()));
        }
        if self.max_parallel == 0 {
            return Err(UploadError::Validation(
                "max parallel transfers must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Callback invoked with progress after every settled chunk.
pub type ProgressCallback = Arc<dyn Fn(&UploadProgress) + Send + Sync>;
/// Callback invoked once when a session completes.
pub type CompleteCallback = Arc<dyn Fn(&UploadSession) + Send + Sync>;
/// Callback invoked once when a session fails.
pub type ErrorCallback = Arc<dyn Fn(&UploadError) + Send + Sync>;

/// Optional observers for one start/resume call.
#[derive(Clone, Default)]
pub struct UploadCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl UploadCallbacks {
    pub(crate) fn progress(&self, progress: &UploadProgress) {
        if let Some(cb) = &self.on_progress {
            cb(progress);
        }
    }

    pub(crate) fn complete(&self, session: &UploadSession) {
        if let Some(cb) = &self.on_complete {
            cb(session);
        }
    }

    pub(crate) fn error(&self, err: &UploadError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }
}

impl fmt::Debug for UploadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Per-call options for [`TransferSession::start`](crate::TransferSession::start)
/// and [`resume`](crate::TransferSession::resume).
///
/// On resume only the callbacks are used; the namespace, id and chunk
/// size come from the persisted record.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Session id to use. A UUID v4 is generated when absent.
    pub upload_id: Option<String>,
    /// Remote namespace (project/workspace) receiving the file.
    pub namespace_id: String,
    /// Overrides the engine chunk size for this session.
    pub chunk_size: Option<u64>,
    pub callbacks: UploadCallbacks,
}

impl UploadOptions {
    pub fn new(namespace_id: impl Into<String>) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            ..Self::default()
        }
    }

    pub fn with_upload_id(mut self, id: impl Into<String>) -> Self {
        self.upload_id = Some(id.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn on_progress(mut self, cb: impl Fn(&UploadProgress) + Send + Sync + 'static) -> Self {
        self.callbacks.on_progress = Some(Arc::new(cb));
        self
    }

    pub fn on_complete(mut self, cb: impl Fn(&UploadSession) + Send + Sync + 'static) -> Self {
        self.callbacks.on_complete = Some(Arc::new(cb));
        self
    }

    pub fn on_error(mut self, cb: impl Fn(&UploadError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(cb));
        self
    }
}

/// What the control plane needs to register a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDescriptor {
    pub namespace_id: String,
    pub file: FileDescriptor,
    pub total_chunks: u32,
}

/// Registration result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredUpload {
    pub remote_file_id: String,
    pub storage_key: String,
    /// Present only when the file may be sent in one request.
    pub single_shot_target: Option<String>,
}

/// A registered remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub namespace_id: String,
    pub remote_file_id: String,
}

/// Where one part must be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTarget {
    pub part_number: u32,
    pub upload_target: String,
}

/// Storage acknowledgement of a transferred part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartReceipt {
    pub integrity_token: Option<String>,
}
