//! Scripted collaborators shared by the engine's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bush_transfer::{
    CompletedPart, MemoryStateStore, StoreError, StoreFuture, UploadSession, UploadStateStore,
};
use tokio::sync::Notify;

use crate::BoxFuture;
use crate::control_plane::ControlPlaneClient;
use crate::error::UploadError;
use crate::transport::ChunkTransport;
use crate::types::{PartReceipt, PartTarget, RegisteredUpload, RemoteFile, UploadDescriptor};

pub const SINGLE_SHOT_TARGET: &str = "mem://single";

fn part_target(part_number: u32) -> String {
    format!("mem://part/{part_number}")
}

fn part_of(target: &str) -> u32 {
    target
        .rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1)
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportState {
    /// Remaining injected failures per part.
    failures: HashMap<u32, u32>,
    attempts: HashMap<u32, u32>,
    bodies: HashMap<u32, usize>,
    targets: Vec<String>,
    no_token: HashSet<u32>,
    blocked: HashSet<u32>,
}

/// In-memory data plane. Tokens are `e{part}`.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
    entered: Arc<Notify>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` attempts of `part_number`.
    pub fn fail_part(&self, part_number: u32, times: u32) {
        self.state.lock().unwrap().failures.insert(part_number, times);
    }

    pub fn omit_token(&self, part_number: u32) {
        self.state.lock().unwrap().no_token.insert(part_number);
    }

    /// Makes attempts of `part_number` hang until dropped.
    pub fn block_part(&self, part_number: u32) {
        self.state.lock().unwrap().blocked.insert(part_number);
    }

    pub fn unblock_all(&self) {
        self.state.lock().unwrap().blocked.clear();
    }

    /// Notified whenever an attempt starts hanging.
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    pub fn attempts(&self, part_number: u32) -> u32 {
        let state = self.state.lock().unwrap();
        state.attempts.get(&part_number).copied().unwrap_or(0)
    }

    pub fn body_len(&self, part_number: u32) -> Option<usize> {
        self.state.lock().unwrap().bodies.get(&part_number).copied()
    }

    pub fn targets(&self) -> Vec<String> {
        self.state.lock().unwrap().targets.clone()
    }
}

impl ChunkTransport for MockTransport {
    fn put_part<'a>(
        &'a self,
        target: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<PartReceipt, UploadError>> {
        Box::pin(async move {
            let part = part_of(target);
            let blocked = {
                let mut state = self.state.lock().unwrap();
                *state.attempts.entry(part).or_default() += 1;
                state.targets.push(target.to_string());
                state.blocked.contains(&part)
            };
            if blocked {
                self.entered.notify_one();
                std::future::pending::<()>().await;
            }

            let mut state = self.state.lock().unwrap();
            if let Some(left) = state.failures.get_mut(&part) {
                if *left > 0 {
                    *left -= 1;
                    return Err(UploadError::Transport(format!("injected failure on part {part}")));
                }
            }
            state.bodies.insert(part, body.len());
            let integrity_token = if state.no_token.contains(&part) {
                None
            } else {
                Some(format!("e{part}"))
            };
            Ok(PartReceipt { integrity_token })
        })
    }
}

// ---------------------------------------------------------------------------
// MockControlPlane
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ControlState {
    calls: Vec<&'static str>,
    completed: Vec<Vec<CompletedPart>>,
    offer_single_shot: bool,
    fail_register: bool,
    fail_abort: bool,
}

/// Control plane that hands out `mem://` targets and records every call.
#[derive(Default)]
pub struct MockControlPlane {
    state: Mutex<ControlState>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer_single_shot(&self) {
        self.state.lock().unwrap().offer_single_shot = true;
    }

    pub fn fail_register(&self) {
        self.state.lock().unwrap().fail_register = true;
    }

    pub fn fail_abort(&self) {
        self.state.lock().unwrap().fail_abort = true;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    /// Parts handed to the last `complete_multipart`.
    pub fn completed_parts(&self) -> Option<Vec<CompletedPart>> {
        self.state.lock().unwrap().completed.last().cloned()
    }

    fn record(&self, call: &'static str) -> std::sync::MutexGuard<'_, ControlState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

impl ControlPlaneClient for MockControlPlane {
    fn register_upload<'a>(
        &'a self,
        descriptor: &'a UploadDescriptor,
    ) -> BoxFuture<'a, Result<RegisteredUpload, UploadError>> {
        Box::pin(async move {
            let state = self.record("register");
            if state.fail_register {
                return Err(UploadError::Transport("500: register rejected".into()));
            }
            Ok(RegisteredUpload {
                remote_file_id: format!("file-{}", descriptor.file.file_name),
                storage_key: format!("{}/{}", descriptor.namespace_id, descriptor.file.file_name),
                single_shot_target: state
                    .offer_single_shot
                    .then(|| SINGLE_SHOT_TARGET.to_string()),
            })
        })
    }

    fn init_multipart<'a>(
        &'a self,
        _file: &'a RemoteFile,
        _total_chunks: u32,
    ) -> BoxFuture<'a, Result<String, UploadError>> {
        Box::pin(async move {
            self.record("init");
            Ok("mpu-1".to_string())
        })
    }

    fn get_part_targets<'a>(
        &'a self,
        _file: &'a RemoteFile,
        _upload_id: &'a str,
        total_chunks: u32,
    ) -> BoxFuture<'a, Result<Vec<PartTarget>, UploadError>> {
        Box::pin(async move {
            self.record("targets");
            Ok((1..=total_chunks)
                .map(|part_number| PartTarget {
                    part_number,
                    upload_target: part_target(part_number),
                })
                .collect())
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        _file: &'a RemoteFile,
        _upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let mut state = self.record("complete");
            state.completed.push(parts.to_vec());
            Ok(())
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        _file: &'a RemoteFile,
        _upload_id: &'a str,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let state = self.record("abort");
            if state.fail_abort {
                return Err(UploadError::Transport("503: abort unavailable".into()));
            }
            Ok(())
        })
    }

    fn confirm_single_shot<'a>(
        &'a self,
        _file: &'a RemoteFile,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            self.record("confirm");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// Memory store whose saves start failing after a set number of successes.
pub struct FailingStore {
    inner: MemoryStateStore,
    saves_left: AtomicUsize,
}

impl FailingStore {
    pub fn fail_after(successful_saves: usize) -> Self {
        Self {
            inner: MemoryStateStore::new(),
            saves_left: AtomicUsize::new(successful_saves),
        }
    }
}

impl UploadStateStore for FailingStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        self.inner.get(id)
    }

    fn get_all(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        self.inner.get_all()
    }

    fn save<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()> {
        let allowed = self
            .saves_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if allowed {
            self.inner.save(session)
        } else {
            Box::pin(async { Err(StoreError::Io(std::io::Error::other("disk full"))) })
        }
    }

    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        self.inner.delete(id)
    }

    fn clear_terminal(&self) -> StoreFuture<'_, usize> {
        self.inner.clear_terminal()
    }
}

// ---------------------------------------------------------------------------
// GatedStore
// ---------------------------------------------------------------------------

/// Memory store whose first `get` hangs until [`release`](Self::release).
pub struct GatedStore {
    inner: MemoryStateStore,
    holding: AtomicBool,
    gate: Notify,
    entered: Arc<Notify>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStateStore::new(),
            holding: AtomicBool::new(true),
            gate: Notify::new(),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Notified once the first `get` is hanging.
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl UploadStateStore for GatedStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        Box::pin(async move {
            if self.holding.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            self.inner.get(id).await
        })
    }

    fn get_all(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        self.inner.get_all()
    }

    fn save<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()> {
        self.inner.save(session)
    }

    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        self.inner.delete(id)
    }

    fn clear_terminal(&self) -> StoreFuture<'_, usize> {
        self.inner.clear_terminal()
    }
}
