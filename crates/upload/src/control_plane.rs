use bush_transfer::CompletedPart;

use crate::BoxFuture;
use crate::error::UploadError;
use crate::types::{PartTarget, RegisteredUpload, RemoteFile, UploadDescriptor};

/// The API that authorizes uploads and manages multipart sessions.
///
/// Implementations must be safe to call from several sessions at once.
pub trait ControlPlaneClient: Send + Sync {
    /// Announces a file and returns its remote identity.
    ///
    /// `single_shot_target` is set only when the backend accepts the
    /// whole file in one request.
    fn register_upload<'a>(
        &'a self,
        descriptor: &'a UploadDescriptor,
    ) -> BoxFuture<'a, Result<RegisteredUpload, UploadError>>;

    /// Opens a multipart session and returns its upload id.
    fn init_multipart<'a>(
        &'a self,
        file: &'a RemoteFile,
        total_chunks: u32,
    ) -> BoxFuture<'a, Result<String, UploadError>>;

    /// Returns one target per part, covering parts `1..=total_chunks`.
    fn get_part_targets<'a>(
        &'a self,
        file: &'a RemoteFile,
        upload_id: &'a str,
        total_chunks: u32,
    ) -> BoxFuture<'a, Result<Vec<PartTarget>, UploadError>>;

    /// Finalizes a multipart session. `parts` is sorted by part number.
    fn complete_multipart<'a>(
        &'a self,
        file: &'a RemoteFile,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BoxFuture<'a, Result<(), UploadError>>;

    /// Discards a multipart session and its uploaded parts.
    fn abort_multipart<'a>(
        &'a self,
        file: &'a RemoteFile,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<(), UploadError>>;

    /// Confirms a file sent through its single-shot target.
    fn confirm_single_shot<'a>(
        &'a self,
        file: &'a RemoteFile,
    ) -> BoxFuture<'a, Result<(), UploadError>>;
}
