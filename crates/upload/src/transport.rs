use crate::BoxFuture;
use crate::error::UploadError;
use crate::types::PartReceipt;

/// Data plane: moves the bytes of one part to its target.
pub trait ChunkTransport: Send + Sync {
    /// Sends `body` to `target` and returns the storage acknowledgement.
    ///
    /// Non-success responses map to [`UploadError::Transport`].
    fn put_part<'a>(
        &'a self,
        target: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<PartReceipt, UploadError>>;
}
