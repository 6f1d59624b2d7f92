use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bush_protocol::{ChunkStatus, UploadStatus};

use crate::chunked::plan_chunks;

/// Name, size and content type of the file behind a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// One part of a session: a fixed byte range plus its transfer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// 1-based part number.
    pub part_number: u32,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
    pub size: u64,
    pub status: ChunkStatus,
    /// Opaque token returned by the storage backend. Only set when completed.
    pub integrity_token: Option<String>,
    pub retry_count: u32,
}

impl ChunkMetadata {
    /// Creates a pending chunk covering `[start, end)`.
    pub fn new(part_number: u32, start: u64, end: u64) -> Self {
        Self {
            part_number,
            start,
            end,
            size: end - start,
            status: ChunkStatus::Pending,
            integrity_token: None,
            retry_count: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ChunkStatus::Completed
    }

    pub fn mark_uploading(&mut self) {
        self.status = ChunkStatus::Uploading;
    }

    pub fn mark_completed(&mut self, integrity_token: Option<String>) {
        self.status = ChunkStatus::Completed;
        self.integrity_token = integrity_token;
    }

    pub fn mark_pending(&mut self) {
        self.status = ChunkStatus::Pending;
    }

    pub fn mark_failed(&mut self) {
        self.status = ChunkStatus::Failed;
        self.integrity_token = None;
    }
}

/// A completed part as handed to the multipart completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub integrity_token: String,
}

/// Persisted record of one file transfer.
///
/// This is the exact shape written to the state store; a crashed
/// process rebuilds everything it needs to resume from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: String,
    pub remote_file_id: Option<String>,
    pub namespace_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub chunks: Vec<ChunkMetadata>,
    pub status: UploadStatus,
    pub remote_upload_id: Option<String>,
    pub remote_storage_key: Option<String>,
    pub uploaded_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl UploadSession {
    /// Creates a pending session and plans its chunks.
    ///
    /// The plan is left empty when the file needs more chunks than a part
    /// number can express; check [`total_chunks`](crate::total_chunks) before creating a session.
    pub fn new(id: String, namespace_id: String, file: &FileDescriptor, chunk_size: u64) -> Self {
        let now = Utc::now();
        let chunks = plan_chunks(file.file_size, chunk_size).unwrap_or_default();
        Self {
            id,
            remote_file_id: None,
            namespace_id,
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            mime_type: file.mime_type.clone(),
            chunk_size,
            total_chunks: chunks.len() as u32,
            chunks,
            status: UploadStatus::Pending,
            remote_upload_id: None,
            remote_storage_key: None,
            uploaded_bytes: 0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Moves to `status` and bumps `updated_at`.
    pub fn set_status(&mut self, status: UploadStatus) {
        self.status = status;
        self.touch();
    }

    /// Marks the session failed with an error message.
    pub fn mark_failed(&mut self, err: &str) {
        self.status = UploadStatus::Failed;
        self.error = Some(err.to_string());
        self.touch();
    }

    pub fn chunk(&self, part_number: u32) -> Option<&ChunkMetadata> {
        self.chunks.iter().find(|c| c.part_number == part_number)
    }

    pub fn chunk_mut(&mut self, part_number: u32) -> Option<&mut ChunkMetadata> {
        self.chunks.iter_mut().find(|c| c.part_number == part_number)
    }

    /// Part numbers that still need transferring, in part order.
    pub fn pending_part_numbers(&self) -> Vec<u32> {
        let mut parts: Vec<u32> = self
            .chunks
            .iter()
            .filter(|c| !c.is_completed())
            .map(|c| c.part_number)
            .collect();
        parts.sort_unstable();
        parts
    }

    pub fn completed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_completed()).count()
    }

    pub fn all_chunks_completed(&self) -> bool {
        self.chunks.iter().all(ChunkMetadata::is_completed)
    }

    /// Completed parts sorted by part number, for multipart completion.
    ///
    /// Completed chunks without a token (single-shot transfers) are skipped.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        let mut parts: Vec<CompletedPart> = self
            .chunks
            .iter()
            .filter(|c| c.is_completed())
            .filter_map(|c| {
                c.integrity_token.as_ref().map(|token| CompletedPart {
                    part_number: c.part_number,
                    integrity_token: token.clone(),
                })
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Sets `uploaded_bytes` to the total size of completed chunks.
    pub fn recompute_uploaded_bytes(&mut self) {
        self.uploaded_bytes = self
            .chunks
            .iter()
            .filter(|c| c.is_completed())
            .map(|c| c.size)
            .sum();
    }

    /// Returns every non-completed chunk to `Pending` with a fresh retry budget.
    ///
    /// Completed chunks keep their status and token.
    pub fn reset_unfinished_chunks(&mut self) {
        for chunk in self.chunks.iter_mut().filter(|c| !c.is_completed()) {
            chunk.mark_pending();
            chunk.integrity_token = None;
            chunk.retry_count = 0;
        }
        self.recompute_uploaded_bytes();
    }

    /// Returns `true` if `file` has the same name and size as the record.
    pub fn matches_file(&self, file: &FileDescriptor) -> bool {
        self.file_name == file.file_name && self.file_size == file.file_size
    }
}
