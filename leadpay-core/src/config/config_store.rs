//! Generic config store with change notification.
//!
//! `ConfigStore<T>` wraps `Arc<RwLock<T>>` and provides a watch-based
//! notification mechanism so that consumers can react to config changes
//! without polling.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};

/// A shared, versioned configuration value.
///
/// Every [`update`](ConfigStore::update) bumps the version and wakes all
/// [`ConfigWatcher`]s.
pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    data: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                data: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Replace the stored value and notify all watchers.
    pub async fn update(&self, value: T) {
        let mut guard = self.inner.data.write().await;
        *guard = value;
        // Release the write lock before waking readers.
        drop(guard);
        self.inner.version_tx.send_modify(|version| *version += 1);
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    /// Number of updates applied since creation.
    pub fn version(&self) -> u64 {
        *self.inner.version_tx.borrow()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T: Clone> ConfigStore<T> {
    /// Clone out the current value.
    pub async fn snapshot(&self) -> T {
        self.inner.data.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Wait until the store is updated.
    ///
    /// Returns `Err` once the [`ConfigStore`] has been dropped.
    pub async fn changed(&mut self) -> Result<u64, watch::error::RecvError> {
        self.version_rx.changed().await?;
        Ok(*self.version_rx.borrow_and_update())
    }
}
