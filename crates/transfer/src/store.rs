//! Durable persistence of upload session records.
//!
//! The engine writes a session after every state change, so whichever
//! store backs it must surface I/O failures instead of swallowing them.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::StoreError;
use crate::types::UploadSession;
use crate::validation::validate_session_id;

/// Boxed future returned by [`UploadStateStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Key-value persistence of one record per upload session.
///
/// Writers for the same id are serialized by the engine, so
/// implementations need no per-record locking.
pub trait UploadStateStore: Send + Sync {
    /// Returns the record for `id`, if any.
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<UploadSession>>;

    /// Returns every persisted record, oldest first.
    fn get_all(&self) -> StoreFuture<'_, Vec<UploadSession>>;

    /// Inserts or replaces the record keyed by `session.id`.
    fn save<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()>;

    /// Removes the record for `id`. Unknown ids are a no-op.
    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    /// Removes every completed, failed or cancelled record.
    ///
    /// Returns the number of records removed.
    fn clear_terminal(&self) -> StoreFuture<'_, usize>;
}

fn sort_oldest_first(sessions: &mut [UploadSession]) {
    sessions.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// Non-durable in-process store.
#[derive(Default)]
pub struct MemoryStateStore {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadStateStore for MemoryStateStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        Box::pin(async move { Ok(self.sessions.read().await.get(id).cloned()) })
    }

    fn get_all(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        Box::pin(async move {
            let mut all: Vec<UploadSession> = self.sessions.read().await.values().cloned().collect();
            sort_oldest_first(&mut all);
            Ok(all)
        })
    }

    fn save<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions
                .write()
                .await
                .insert(session.id.clone(), session.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.write().await.remove(id);
            Ok(())
        })
    }

    fn clear_terminal(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut map = self.sessions.write().await;
            let before = map.len();
            map.retain(|_, s| !s.is_terminal());
            Ok(before - map.len())
        })
    }
}

// ---------------------------------------------------------------------------
// JsonFileStateStore
// ---------------------------------------------------------------------------

/// Stores each session as `<dir>/<id>.json`.
///
/// Records are written to a temporary sibling and renamed into place, so
/// a crash mid-write leaves the previous record intact.
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn load(path: &Path) -> Result<Option<UploadSession>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id, "deleted upload record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<UploadSession>, StoreError> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(session) = Self::load(&path).await? {
                sessions.push(session);
            }
        }
        sort_oldest_first(&mut sessions);
        Ok(sessions)
    }
}

impl UploadStateStore for JsonFileStateStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        Box::pin(async move {
            let path = self.record_path(id)?;
            Self::load(&path).await
        })
    }

    fn get_all(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        Box::pin(self.load_all())
    }

    fn save<'a>(&'a self, session: &'a UploadSession) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.record_path(&session.id)?;
            let tmp = self.dir.join(format!("{}.json.tmp", session.id));
            let json = serde_json::to_vec_pretty(session)?;

            tokio::fs::write(&tmp, json).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                warn!(id = %session.id, error = %e, "failed to move upload record into place");
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.remove(id))
    }

    fn clear_terminal(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut removed = 0;
            for session in self.load_all().await? {
                if session.is_terminal() {
                    self.remove(&session.id).await?;
                    removed += 1;
                }
            }
            debug!(removed, dir = %self.dir.display(), "cleared terminal upload records");
            Ok(removed)
        })
    }
}
