use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::ChunkMetadata;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Number of chunks needed to cover `file_size` bytes.
///
/// Returns `Some(0)` when either argument is 0 and `None` when the count
/// does not fit a part number.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Option<u32> {
    if file_size == 0 || chunk_size == 0 {
        return Some(0);
    }
    u32::try_from(file_size.div_ceil(chunk_size)).ok()
}

/// Splits `[0, file_size)` into contiguous, non-overlapping chunks.
///
/// Every chunk is `chunk_size` long except possibly the last one. Part
/// numbers start at 1. An empty file (or a zero chunk size) yields an
/// empty plan; callers must reject those before planning. Returns `None`
/// when the file needs more than `u32::MAX` chunks.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Option<Vec<ChunkMetadata>> {
    let count = total_chunks(file_size, chunk_size)?;
    let mut chunks = Vec::with_capacity(count as usize);
    let mut start = 0u64;
    for part_number in 1..=count {
        let end = std::cmp::min(start + chunk_size, file_size);
        chunks.push(ChunkMetadata::new(part_number, start, end));
        start = end;
    }
    Some(chunks)
}

// ---------------------------------------------------------------------------
// Range reads
// ---------------------------------------------------------------------------

/// Reads exactly the bytes in `[start, end)` from the file at `path`.
///
/// Fails with `UnexpectedEof` if the file is shorter than `end`, which
/// happens when the source changed after the session was planned.
pub fn read_range(path: &Path, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    if end < start {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid range {start}..{end}"),
        ));
    }
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Computes the SHA-256 digest of `data`.
pub fn checksum_bytes(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
