//! Durable Key-Value Storage
//!
//! A small JSON-file-backed store for the hub's two persisted documents
//! (hierarchy cache and metrics aggregate). Writers mark the store dirty;
//! a flusher task writes at most once per coalescing window, via a temp
//! file and rename so a crash never leaves a torn state file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// File name of the persisted state inside the data directory.
const STATE_FILE: &str = "hub-state.json";

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be decoded.
    #[error("storage decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// JSON-file-backed key-value store.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Value>>,
    dirty: AtomicBool,
}

impl FileStore {
    /// Open (or initialise) the store under the given data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// state file cannot be read. A corrupt state file is discarded with a
    /// warning rather than failing startup.
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(STATE_FILE);

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Value>>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "discarding corrupt state file");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
            dirty: AtomicBool::new(false),
        })
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    /// Write a value and mark the store dirty; the flusher persists it
    /// within the coalescing window.
    pub fn put(&self, key: &str, value: Value) {
        self.state.lock().insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Release);
    }

    /// Persist the current state if anything changed since the last flush.
    ///
    /// # Errors
    ///
    /// Returns an error when the state file cannot be written; the dirty
    /// flag is restored so the next flush retries.
    pub async fn flush(&self) -> Result<(), StorageError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let encoded = {
            let state = self.state.lock();
            serde_json::to_vec(&*state)?
        };

        let tmp = self.path.with_extension("tmp");
        let result = async {
            tokio::fs::write(&tmp, &encoded).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Run the coalescing flush loop until cancelled, with a final flush on
    /// the way out.
    pub async fn run_flusher(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        tracing::warn!(error = %e, "state flush failed");
                    }
                }
            }
        }

        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "final state flush failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn round_trips_values_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.put("hierarchy", json!({"cachedAtMs": 123, "data": {"sport": {}}}));
            store.flush().await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let value = store.get("hierarchy").unwrap();
        assert_eq!(value["cachedAtMs"], json!(123));
    }

    #[tokio::test]
    async fn flush_without_changes_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.flush().await.unwrap();
        assert!(!dir.path().join(STATE_FILE).exists());
    }

    #[tokio::test]
    async fn corrupt_state_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(STATE_FILE), b"{not json")
            .await
            .unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.get("anything").is_none());
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.put("metrics", json!({"v": 1}));
        store.put("metrics", json!({"v": 2}));
        assert_eq!(store.get("metrics").unwrap()["v"], json!(2));
    }
}
