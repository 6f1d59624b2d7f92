//! Session facade: start, pause, resume and cancel uploads.
//!
//! [`TransferSession`] owns the lifecycle of every upload it runs. Each
//! running start/resume call registers an [`ActiveRun`] in a map keyed by
//! session id; pause and cancel find the run there, record why it is being
//! interrupted, fire its cancellation token and wait until the run has
//! persisted its final state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bush_transfer::{
    FileDescriptor, UploadSession, UploadStateStore, UploadStatus, total_chunks,
    validate_session_id,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::control_plane::ControlPlaneClient;
use crate::coordinator::{ChunkTransferCoordinator, CoordinatorConfig};
use crate::error::UploadError;
use crate::source::UploadSource;
use crate::transport::ChunkTransport;
use crate::types::{EngineConfig, RemoteFile, UploadCallbacks, UploadDescriptor, UploadOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Pause,
    Cancel,
}

/// Handle on one running start/resume call.
struct ActiveRun {
    cancel: CancellationToken,
    interrupt: Mutex<Option<Interrupt>>,
    done: watch::Sender<bool>,
}

impl ActiveRun {
    fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            interrupt: Mutex::new(None),
            done,
        }
    }

    /// Stops the run. The first reason given wins.
    fn interrupt(&self, reason: Interrupt) {
        {
            let mut slot = lock(&self.interrupt);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    fn reason(&self) -> Option<Interrupt> {
        *lock(&self.interrupt)
    }

    /// Waits until the run has released its slot.
    async fn settled(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Releases the active slot when a run ends, however it ends.
struct RunGuard<'a> {
    owner: &'a TransferSession,
    id: String,
    run: Arc<ActiveRun>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        {
            let mut active = lock(&self.owner.active);
            if active
                .get(&self.id)
                .is_some_and(|run| Arc::ptr_eq(run, &self.run))
            {
                active.remove(&self.id);
            }
        }
        self.run.done.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Races `fut` against `token`.
async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T, UploadError>>,
) -> Result<T, UploadError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(UploadError::Cancelled),
        result = fut => result,
    }
}

/// Upload engine facade.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct TransferSession {
    config: EngineConfig,
    control_plane: Arc<dyn ControlPlaneClient>,
    transport: Arc<dyn ChunkTransport>,
    store: Arc<dyn UploadStateStore>,
    active: Mutex<HashMap<String, Arc<ActiveRun>>>,
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("config", &self.config)
            .field("active_runs", &lock(&self.active).len())
            .finish_non_exhaustive()
    }
}

impl TransferSession {
    pub fn new(
        config: EngineConfig,
        control_plane: Arc<dyn ControlPlaneClient>,
        transport: Arc<dyn ChunkTransport>,
        store: Arc<dyn UploadStateStore>,
    ) -> Self {
        Self {
            config,
            control_plane,
            transport,
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` while a start/resume call for `id` is running.
    pub fn is_active(&self, id: &str) -> bool {
        lock(&self.active).contains_key(id)
    }

    fn active_run(&self, id: &str) -> Option<Arc<ActiveRun>> {
        lock(&self.active).get(id).cloned()
    }

    fn claim_run(&self, id: &str, operation: &'static str) -> Result<RunGuard<'_>, UploadError> {
        let mut active = lock(&self.active);
        if active.contains_key(id) {
            return Err(UploadError::InvalidState {
                id: id.to_string(),
                status: UploadStatus::Uploading,
                operation,
            });
        }
        let run = Arc::new(ActiveRun::new());
        active.insert(id.to_string(), Arc::clone(&run));
        Ok(RunGuard {
            owner: self,
            id: id.to_string(),
            run,
        })
    }

    /// Uploads a new file.
    ///
    /// Resolves once the upload has completed, failed, or been paused or
    /// cancelled from another task. Returns the final record on success.
    pub async fn start(
        &self,
        source: Arc<dyn UploadSource>,
        options: UploadOptions,
    ) -> Result<UploadSession, UploadError> {
        let file = source.descriptor();
        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);

        if file.file_size == 0 {
            return Err(UploadError::Validation(format!(
                "{} is empty",
                file.file_name
            )));
        }
        if chunk_size == 0 {
            return Err(UploadError::Validation("chunk size must be positive".into()));
        }
        if total_chunks(file.file_size, chunk_size).is_none() {
            return Err(UploadError::Validation(format!(
                "{} needs more than {} chunks of {chunk_size} bytes",
                file.file_name,
                u32::MAX
            )));
        }
        if options.namespace_id.is_empty() {
            return Err(UploadError::Validation("namespace id is required".into()));
        }

        let id = options
            .upload_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        validate_session_id(&id).map_err(|e| UploadError::Validation(e.to_string()))?;

        let guard = self.claim_run(&id, "start")?;
        if let Some(existing) = self.store.get(&id).await? {
            return Err(UploadError::InvalidState {
                id,
                status: existing.status,
                operation: "start",
            });
        }

        let mut session = UploadSession::new(id, options.namespace_id, &file, chunk_size);
        self.store.save(&session).await?;
        info!(
            upload_id = %session.id,
            file = %session.file_name,
            size = session.file_size,
            chunks = session.total_chunks,
            "upload started"
        );

        let result = self
            .drive(&mut session, source, &guard.run, &options.callbacks)
            .await;
        self.finish(session, &guard.run, result, &options.callbacks)
            .await
    }

    /// Pauses a running upload.
    ///
    /// Waits for the run to stop and returns the persisted `Paused` record.
    /// A record left `Uploading` by a crashed process is paused directly.
    pub async fn pause(&self, id: &str) -> Result<UploadSession, UploadError> {
        let run = self.active_run(id);
        let session = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        if session.status != UploadStatus::Uploading {
            return Err(UploadError::InvalidState {
                id: id.to_string(),
                status: session.status,
                operation: "pause",
            });
        }

        let Some(run) = run else {
            let mut session = session;
            session.set_status(UploadStatus::Paused);
            self.store.save(&session).await?;
            info!(upload_id = %id, "orphaned upload paused");
            return Ok(session);
        };

        run.interrupt(Interrupt::Pause);
        run.settled().await;

        let session = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        if session.status != UploadStatus::Paused {
            return Err(UploadError::InvalidState {
                id: id.to_string(),
                status: session.status,
                operation: "pause",
            });
        }
        Ok(session)
    }

    /// Resumes a paused upload from `source`.
    ///
    /// `source` must have the same name and size as the original file.
    /// Only the callbacks of `options` are used.
    pub async fn resume(
        &self,
        id: &str,
        source: Arc<dyn UploadSource>,
        options: UploadOptions,
    ) -> Result<UploadSession, UploadError> {
        let mut session = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        if session.status != UploadStatus::Paused {
            return Err(UploadError::InvalidState {
                id: id.to_string(),
                status: session.status,
                operation: "resume",
            });
        }
        let file = source.descriptor();
        if !session.matches_file(&file) {
            return Err(UploadError::Validation(format!(
                "{} ({} bytes) does not match upload {} of {} ({} bytes)",
                file.file_name, file.file_size, id, session.file_name, session.file_size
            )));
        }

        let guard = self.claim_run(id, "resume")?;

        if session.remote_upload_id.is_none() {
            // Parts only exist inside a multipart session.
            for chunk in &mut session.chunks {
                chunk.mark_pending();
                chunk.integrity_token = None;
            }
        }
        session.reset_unfinished_chunks();
        session.error = None;
        session.set_status(UploadStatus::Uploading);
        self.store.save(&session).await?;
        info!(
            upload_id = %session.id,
            remaining = session.pending_part_numbers().len(),
            uploaded = session.uploaded_bytes,
            "upload resumed"
        );

        let result = self
            .drive(&mut session, source, &guard.run, &options.callbacks)
            .await;
        self.finish(session, &guard.run, result, &options.callbacks)
            .await
    }

    /// Cancels an upload and deletes its record.
    ///
    /// Unknown ids are a no-op. Completed, failed and cancelled uploads
    /// cannot be cancelled.
    pub async fn cancel(&self, id: &str) -> Result<(), UploadError> {
        let run = self.active_run(id);
        let Some(session) = self.store.get(id).await? else {
            if let Some(run) = run {
                run.interrupt(Interrupt::Cancel);
                run.settled().await;
            }
            return Ok(());
        };
        if session.is_terminal() {
            return Err(UploadError::InvalidState {
                id: id.to_string(),
                status: session.status,
                operation: "cancel",
            });
        }

        let session = match run {
            Some(run) => {
                run.interrupt(Interrupt::Cancel);
                run.settled().await;
                match self.store.get(id).await? {
                    Some(s) if s.is_terminal() => {
                        return Err(UploadError::InvalidState {
                            id: id.to_string(),
                            status: s.status,
                            operation: "cancel",
                        });
                    }
                    Some(s) => s,
                    None => return Ok(()),
                }
            }
            None => session,
        };

        self.discard(&session).await
    }

    /// Aborts the multipart session of `session`, if any, and deletes its
    /// record. A failed abort is logged and otherwise ignored.
    async fn discard(&self, session: &UploadSession) -> Result<(), UploadError> {
        if let (Some(remote_file_id), Some(upload_id)) =
            (&session.remote_file_id, &session.remote_upload_id)
        {
            let remote = RemoteFile {
                namespace_id: session.namespace_id.clone(),
                remote_file_id: remote_file_id.clone(),
            };
            if let Err(e) = self.control_plane.abort_multipart(&remote, upload_id).await {
                warn!(upload_id = %session.id, error = %e, "failed to abort multipart session");
            }
        }

        self.store.delete(&session.id).await?;
        info!(upload_id = %session.id, "upload cancelled");
        Ok(())
    }

    /// Returns the persisted record for `id`.
    pub async fn get_state(&self, id: &str) -> Result<Option<UploadSession>, UploadError> {
        Ok(self.store.get(id).await?)
    }

    /// Returns every persisted record, oldest first.
    pub async fn get_all_uploads(&self) -> Result<Vec<UploadSession>, UploadError> {
        Ok(self.store.get_all().await?)
    }

    /// Deletes completed, failed and cancelled records.
    pub async fn clear_completed(&self) -> Result<usize, UploadError> {
        let removed = self.store.clear_terminal().await?;
        info!(removed, "cleared finished uploads");
        Ok(removed)
    }

    /// Pauses records left pending or uploading by a process that exited
    /// mid-transfer, so they can be resumed.
    pub async fn recover_orphans(&self) -> Result<Vec<UploadSession>, UploadError> {
        let mut recovered = Vec::new();
        for mut session in self.store.get_all().await? {
            if !matches!(
                session.status,
                UploadStatus::Pending | UploadStatus::Uploading
            ) || self.is_active(&session.id)
            {
                continue;
            }
            session.reset_unfinished_chunks();
            session.set_status(UploadStatus::Paused);
            self.store.save(&session).await?;
            info!(upload_id = %session.id, "recovered orphaned upload");
            recovered.push(session);
        }
        Ok(recovered)
    }

    /// Registers, transfers and completes `session`.
    async fn drive(
        &self,
        session: &mut UploadSession,
        source: Arc<dyn UploadSource>,
        run: &ActiveRun,
        callbacks: &UploadCallbacks,
    ) -> Result<(), UploadError> {
        let token = &run.cancel;
        let mut single_shot_target = None;

        if session.remote_file_id.is_none() {
            let descriptor = UploadDescriptor {
                namespace_id: session.namespace_id.clone(),
                file: FileDescriptor {
                    file_name: session.file_name.clone(),
                    file_size: session.file_size,
                    mime_type: session.mime_type.clone(),
                },
                total_chunks: session.total_chunks,
            };
            let registered =
                cancellable(token, self.control_plane.register_upload(&descriptor)).await?;
            session.remote_file_id = Some(registered.remote_file_id);
            session.remote_storage_key = Some(registered.storage_key);
            single_shot_target = registered.single_shot_target;
        }
        session.set_status(UploadStatus::Uploading);
        self.store.save(session).await?;

        let remote = RemoteFile {
            namespace_id: session.namespace_id.clone(),
            remote_file_id: session.remote_file_id.clone().unwrap_or_default(),
        };

        if let Some(target) = single_shot_target
            .filter(|_| session.total_chunks == 1 && session.remote_upload_id.is_none())
        {
            let coordinator = self.coordinator(source, false);
            let targets = HashMap::from([(1, target)]);
            coordinator.run(session, &targets, token, callbacks).await?;
            cancellable(token, self.control_plane.confirm_single_shot(&remote)).await?;
            return Ok(());
        }

        let upload_id = match session.remote_upload_id.clone() {
            Some(upload_id) => upload_id,
            None => {
                let upload_id = cancellable(
                    token,
                    self.control_plane
                        .init_multipart(&remote, session.total_chunks),
                )
                .await?;
                session.remote_upload_id = Some(upload_id.clone());
                session.touch();
                self.store.save(session).await?;
                upload_id
            }
        };

        let targets: HashMap<u32, String> = cancellable(
            token,
            self.control_plane
                .get_part_targets(&remote, &upload_id, session.total_chunks),
        )
        .await?
        .into_iter()
        .map(|t| (t.part_number, t.upload_target))
        .collect();

        let coordinator = self.coordinator(source, true);
        coordinator.run(session, &targets, token, callbacks).await?;

        let parts = session.completed_parts();
        cancellable(
            token,
            self.control_plane
                .complete_multipart(&remote, &upload_id, &parts),
        )
        .await
    }

    fn coordinator(
        &self,
        source: Arc<dyn UploadSource>,
        require_integrity_token: bool,
    ) -> ChunkTransferCoordinator {
        ChunkTransferCoordinator::new(
            Arc::clone(&self.transport),
            source,
            Arc::clone(&self.store),
            CoordinatorConfig {
                max_parallel: self.config.max_parallel,
                max_retries: self.config.max_retries,
                require_integrity_token,
            },
        )
    }

    /// Settles the outcome of a run into exactly one terminal result.
    async fn finish(
        &self,
        mut session: UploadSession,
        run: &ActiveRun,
        result: Result<(), UploadError>,
        callbacks: &UploadCallbacks,
    ) -> Result<UploadSession, UploadError> {
        let err = match result {
            Ok(()) => {
                session.error = None;
                session.set_status(UploadStatus::Completed);
                match self.store.save(&session).await {
                    Ok(()) => {
                        info!(
                            upload_id = %session.id,
                            size = session.file_size,
                            "upload completed"
                        );
                        callbacks.complete(&session);
                        return Ok(session);
                    }
                    Err(e) => UploadError::from(e),
                }
            }
            Err(e) => match run.reason() {
                Some(Interrupt::Pause) => {
                    session.set_status(UploadStatus::Paused);
                    self.store.save(&session).await?;
                    info!(
                        upload_id = %session.id,
                        uploaded = session.uploaded_bytes,
                        "upload paused"
                    );
                    return Err(UploadError::Paused);
                }
                Some(Interrupt::Cancel) => {
                    self.discard(&session).await?;
                    return Err(UploadError::Cancelled);
                }
                None => e,
            },
        };

        error!(upload_id = %session.id, error = %err, "upload failed");
        session.mark_failed(&err.to_string());
        let err = match self.store.save(&session).await {
            Ok(()) => err,
            Err(e) => {
                error!(
                    upload_id = %session.id,
                    error = %e,
                    "failed to persist failed upload, stored record is stale"
                );
                UploadError::from(e)
            }
        };
        callbacks.error(&err);
        Err(err)
    }
}
