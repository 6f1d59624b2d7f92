use std::time::{Duration, Instant};

use crate::types::UploadSession;

// ---------------------------------------------------------------------------
// ThroughputMeter
// ---------------------------------------------------------------------------

/// Measures instantaneous throughput between consecutive progress reports.
///
/// Each call to [`record`](Self::record) compares against the previous
/// report only, so the rate tracks recent conditions instead of averaging
/// over the whole transfer.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    last_bytes: u64,
    last_at: Instant,
}

impl ThroughputMeter {
    /// Starts measuring from `bytes` already uploaded at `now`.
    pub fn new(bytes: u64, now: Instant) -> Self {
        Self {
            last_bytes: bytes,
            last_at: now,
        }
    }

    /// Records the cumulative `bytes` uploaded at `now` and returns bytes/second
    /// since the previous report.
    ///
    /// Returns 0.0 when no time has elapsed.
    pub fn record(&mut self, bytes: u64, now: Instant) -> f64 {
        let delta_bytes = bytes.saturating_sub(self.last_bytes);
        let elapsed = now.saturating_duration_since(self.last_at);
        self.last_bytes = bytes;
        self.last_at = now;

        if elapsed.is_zero() {
            return 0.0;
        }
        delta_bytes as f64 / elapsed.as_secs_f64()
    }
}

// ---------------------------------------------------------------------------
// UploadProgress
// ---------------------------------------------------------------------------

/// Progress snapshot emitted after every settled chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub upload_id: String,
    pub file_name: String,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// 0–100.
    pub percentage: f64,
    pub bytes_per_second: f64,
    /// Zero when throughput is unknown.
    pub eta: Duration,
    pub completed_chunks: usize,
    pub total_chunks: u32,
}

impl UploadProgress {
    /// Builds a snapshot from a session and the current throughput.
    pub fn from_session(session: &UploadSession, bytes_per_second: f64) -> Self {
        let remaining = session.file_size.saturating_sub(session.uploaded_bytes);
        let eta = if bytes_per_second > 0.0 {
            Duration::from_secs_f64(remaining as f64 / bytes_per_second)
        } else {
            Duration::ZERO
        };
        let percentage = if session.file_size == 0 {
            0.0
        } else {
            session.uploaded_bytes as f64 / session.file_size as f64 * 100.0
        };

        Self {
            upload_id: session.id.clone(),
            file_name: session.file_name.clone(),
            uploaded_bytes: session.uploaded_bytes,
            total_bytes: session.file_size,
            percentage,
            bytes_per_second,
            eta,
            completed_chunks: session.completed_chunks(),
            total_chunks: session.total_chunks,
        }
    }
}
