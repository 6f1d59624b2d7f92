//! Byte sources an upload can read from.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bush_transfer::FileDescriptor;

use crate::BoxFuture;
use crate::error::UploadError;

/// Fallback content type when the extension is unknown.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A file-like thing with a name, a size, and random-access reads.
pub trait UploadSource: Send + Sync {
    fn descriptor(&self) -> FileDescriptor;

    /// Reads bytes `[start, end)`.
    fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, Result<Vec<u8>, UploadError>>;
}

/// Detects the content type from the file extension.
pub fn detect_mime_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mxf") => "application/mxf",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("tif" | "tiff") => "image/tiff",
        Some("exr") => "image/x-exr",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => DEFAULT_MIME_TYPE,
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on local disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    descriptor: FileDescriptor,
}

impl FileSource {
    /// Opens `path`, capturing its name, size and content type.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(UploadError::Validation(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                UploadError::Validation(format!("unusable file name: {}", path.display()))
            })?
            .to_string();
        let mime_type = detect_mime_type(&file_name).to_string();

        Ok(Self {
            descriptor: FileDescriptor {
                file_name,
                file_size: meta.len(),
                mime_type,
            },
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for FileSource {
    fn descriptor(&self) -> FileDescriptor {
        self.descriptor.clone()
    }

    fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, Result<Vec<u8>, UploadError>> {
        let path = self.path.clone();
        Box::pin(async move {
            let bytes =
                tokio::task::spawn_blocking(move || bush_transfer::read_range(&path, start, end))
                    .await
                    .map_err(|e| UploadError::Io(io::Error::other(e)))??;
            Ok(bytes)
        })
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory buffer posing as a file.
#[derive(Debug, Clone)]
pub struct MemorySource {
    descriptor: FileDescriptor,
    data: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = detect_mime_type(&file_name).to_string();
        Self {
            descriptor: FileDescriptor {
                file_name,
                file_size: data.len() as u64,
                mime_type,
            },
            data: Arc::new(data),
        }
    }
}

impl UploadSource for MemorySource {
    fn descriptor(&self) -> FileDescriptor {
        self.descriptor.clone()
    }

    fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, Result<Vec<u8>, UploadError>> {
        Box::pin(async move {
            let len = self.data.len() as u64;
            if start > end || end > len {
                return Err(UploadError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range {start}..{end} outside buffer of {len} bytes"),
                )));
            }
            Ok(self.data[start as usize..end as usize].to_vec())
        })
    }
}
