//! Concurrent chunk transfer with per-chunk retry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use bush_transfer::{ThroughputMeter, UploadProgress, UploadSession, UploadStateStore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FailedChunk, UploadError};
use crate::source::UploadSource;
use crate::transport::ChunkTransport;
use crate::types::{PartReceipt, UploadCallbacks};

/// Coordinator limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub max_parallel: usize,
    pub max_retries: u32,
    /// Fail an attempt whose receipt has no integrity token.
    pub require_integrity_token: bool,
}

/// Result of one worker, tagged with its part.
struct PartOutcome {
    part_number: u32,
    result: Result<PartReceipt, UploadError>,
}

/// Transfers the non-completed chunks of a session.
///
/// The coordinator is the only writer of chunk state while it runs;
/// workers read their byte range and transfer it, nothing else.
pub struct ChunkTransferCoordinator {
    transport: Arc<dyn ChunkTransport>,
    source: Arc<dyn UploadSource>,
    store: Arc<dyn UploadStateStore>,
    config: CoordinatorConfig,
}

impl ChunkTransferCoordinator {
    pub fn new(
        transport: Arc<dyn ChunkTransport>,
        source: Arc<dyn UploadSource>,
        store: Arc<dyn UploadStateStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            transport,
            source,
            store,
            config,
        }
    }

    /// Transfers every chunk of `session` that is not yet completed.
    ///
    /// `targets` maps part numbers to upload targets. The session is
    /// persisted after every chunk state change. Returns
    /// [`UploadError::Cancelled`] as soon as `cancel` fires; in-flight
    /// workers are aborted when the worker set drops.
    pub async fn run(
        &self,
        session: &mut UploadSession,
        targets: &HashMap<u32, String>,
        cancel: &CancellationToken,
        callbacks: &UploadCallbacks,
    ) -> Result<(), UploadError> {
        let max_parallel = self.config.max_parallel.max(1);
        let mut queue: VecDeque<u32> = session.pending_part_numbers().into();
        let mut workers: JoinSet<PartOutcome> = JoinSet::new();
        let mut failed: Vec<FailedChunk> = Vec::new();
        let mut meter = ThroughputMeter::new(session.uploaded_bytes, Instant::now());

        debug!(
            upload_id = %session.id,
            pending = queue.len(),
            max_parallel,
            "starting chunk transfer"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            while workers.len() < max_parallel {
                let Some(part_number) = queue.pop_front() else {
                    break;
                };
                let chunk = chunk_mut(session, part_number)?;
                chunk.mark_uploading();
                let (start, end) = (chunk.start, chunk.end);
                session.touch();
                self.store.save(session).await?;

                let transport = Arc::clone(&self.transport);
                let source = Arc::clone(&self.source);
                let target = targets.get(&part_number).cloned();
                let cancel = cancel.clone();
                workers.spawn(async move {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(UploadError::Cancelled),
                        r = transfer_part(transport, source, target, part_number, start, end) => r,
                    };
                    PartOutcome {
                        part_number,
                        result,
                    }
                });
            }

            if workers.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                joined = workers.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let outcome = joined
                .map_err(|e| UploadError::Transport(format!("part worker failed: {e}")))?;

            let part_number = outcome.part_number;
            let result = outcome.result.and_then(|receipt| {
                if self.config.require_integrity_token && receipt.integrity_token.is_none() {
                    Err(UploadError::Integrity { part_number })
                } else {
                    Ok(receipt)
                }
            });

            match result {
                Ok(receipt) => {
                    chunk_mut(session, part_number)?.mark_completed(receipt.integrity_token);
                    session.recompute_uploaded_bytes();
                    session.touch();
                    self.store.save(session).await?;
                    debug!(
                        upload_id = %session.id,
                        part_number,
                        uploaded = session.uploaded_bytes,
                        "part transferred"
                    );
                    report(session, &mut meter, callbacks);
                }
                Err(UploadError::Cancelled) => return Err(UploadError::Cancelled),
                Err(e) => {
                    let max_retries = self.config.max_retries;
                    let chunk = chunk_mut(session, part_number)?;
                    if e.is_retryable() && chunk.retry_count < max_retries {
                        chunk.retry_count += 1;
                        chunk.mark_pending();
                        let retry = chunk.retry_count;
                        session.touch();
                        self.store.save(session).await?;
                        queue.push_back(part_number);
                        warn!(
                            upload_id = %session.id,
                            part_number,
                            retry,
                            max_retries,
                            error = %e,
                            "part failed, retrying"
                        );
                    } else {
                        chunk.mark_failed();
                        let attempts = chunk.retry_count + 1;
                        session.touch();
                        self.store.save(session).await?;
                        warn!(
                            upload_id = %session.id,
                            part_number,
                            attempts,
                            error = %e,
                            "part exhausted retries"
                        );
                        failed.push(FailedChunk {
                            part_number,
                            attempts,
                            last_error: e.to_string(),
                        });
                        report(session, &mut meter, callbacks);
                    }
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort_by_key(|f| f.part_number);
            Err(UploadError::ExhaustedRetries { failed })
        }
    }
}

async fn transfer_part(
    transport: Arc<dyn ChunkTransport>,
    source: Arc<dyn UploadSource>,
    target: Option<String>,
    part_number: u32,
    start: u64,
    end: u64,
) -> Result<PartReceipt, UploadError> {
    let target = target.ok_or_else(|| {
        UploadError::Transport(format!("no upload target for part {part_number}"))
    })?;
    let body = source.read_range(start, end).await?;
    transport.put_part(&target, body).await
}

fn chunk_mut(
    session: &mut UploadSession,
    part_number: u32,
) -> Result<&mut bush_transfer::ChunkMetadata, UploadError> {
    let id = session.id.clone();
    session
        .chunk_mut(part_number)
        .ok_or_else(|| UploadError::Validation(format!("upload {id} has no part {part_number}")))
}

fn report(session: &UploadSession, meter: &mut ThroughputMeter, callbacks: &UploadCallbacks) {
    let rate = meter.record(session.uploaded_bytes, Instant::now());
    callbacks.progress(&UploadProgress::from_session(session, rate));
}
