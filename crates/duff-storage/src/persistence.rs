//! Shared storage handle and persistence adapters.
//!
//! [`StorageHandle`] is the only way tasks share a [`Storage`]: a
//! `parking_lot::RwLock` serializes writers, and guards are never held
//! across an `.await`. Saving snapshots under the read lock, then awaits the
//! adapter with the lock released.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use duff_core::error::WalletError;
use duff_core::events::StorageEvent;

use crate::storage::{Storage, StorageSnapshot};

/// Backend that stores and restores [`StorageSnapshot`]s.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Load the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<StorageSnapshot>, WalletError>;

    /// Persist a snapshot, replacing the previous one.
    async fn save(&self, snapshot: &StorageSnapshot) -> Result<(), WalletError>;
}

/// JSON file adapter. Writes go to a sibling temp file and are renamed into
/// place.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    /// Adapter persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceAdapter for FileAdapter {
    async fn load(&self) -> Result<Option<StorageSnapshot>, WalletError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    WalletError::Persistence(format!("{}: {e}", self.path.display()))
                })?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WalletError::Persistence(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, snapshot: &StorageSnapshot) -> Result<(), WalletError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "state written");
        Ok(())
    }
}

/// Adapter keeping the last snapshot in memory. Counts saves.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    slot: Mutex<Option<StorageSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryAdapter {
    /// Empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved snapshot.
    pub fn last(&self) -> Option<StorageSnapshot> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    async fn load(&self) -> Result<Option<StorageSnapshot>, WalletError> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, snapshot: &StorageSnapshot) -> Result<(), WalletError> {
        *self.slot.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cloneable handle to shared storage and its optional adapter.
#[derive(Clone)]
pub struct StorageHandle {
    inner: Arc<RwLock<Storage>>,
    adapter: Option<Arc<dyn PersistenceAdapter>>,
}

impl StorageHandle {
    /// Handle over in-memory storage without persistence.
    pub fn new(storage: Storage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
            adapter: None,
        }
    }

    /// Handle persisting through `adapter`.
    pub fn with_adapter(storage: Storage, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
            adapter: Some(adapter),
        }
    }

    /// Restore from `adapter`, or start empty if it holds nothing.
    pub async fn rehydrate(adapter: Arc<dyn PersistenceAdapter>) -> Result<Self, WalletError> {
        let storage = match adapter.load().await? {
            Some(snapshot) => {
                info!(wallets = snapshot.wallets.len(), "storage rehydrated");
                Storage::from_snapshot(snapshot)?
            }
            None => Storage::new(),
        };
        Ok(Self::with_adapter(storage, adapter))
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Storage> {
        self.inner.read()
    }

    /// Exclusive write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, Storage> {
        self.inner.write()
    }

    /// Subscribe to mutation events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.read().subscribe()
    }

    /// Whether a persistence adapter is configured.
    pub fn is_persistent(&self) -> bool {
        self.adapter.is_some()
    }

    /// Snapshot the state and hand it to the adapter.
    ///
    /// Returns `false` when no adapter is configured.
    pub async fn save_state(&self) -> Result<bool, WalletError> {
        let Some(adapter) = self.adapter.clone() else {
            return Ok(false);
        };
        let snapshot = self.inner.read().snapshot();
        adapter.save(&snapshot).await?;
        self.inner.read().emit(StorageEvent::StateSaved);
        Ok(true)
    }
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("persistent", &self.is_persistent())
            .finish_non_exhaustive()
    }
}
