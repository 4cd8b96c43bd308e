//! State snapshot persistence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use remedy_types::StateSnapshot;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreResult;

/// Durable destination of the per-cycle state snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &StateSnapshot) -> StoreResult<()>;

    /// Most recently saved snapshot, if any.
    async fn load(&self) -> StoreResult<Option<StateSnapshot>>;
}

/// In-memory store for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    latest: RwLock<Option<StateSnapshot>>,
    saves: AtomicU64,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        *self.latest.write().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<StateSnapshot>> {
        Ok(self.latest.read().await.clone())
    }
}

/// Pretty-printed JSON document on disk.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so readers never observe a partial document.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn save(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Snapshot persisted");
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<StateSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use chrono::Utc;
    use remedy_types::{LoopState, RunId};

    fn snapshot() -> StateSnapshot {
        StateSnapshot::initial(Utc::now(), LoopState::new(RunId::generate()))
    }

    #[tokio::test]
    async fn test_in_memory_save_and_load() {
        let store = InMemoryStateStore::new();
        assert!(store.load().await.unwrap().is_none());

        let snapshot = snapshot();
        store.save(&snapshot).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(snapshot));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("state").join("remedy.json"));
        assert!(store.load().await.unwrap().is_none());

        let snapshot = snapshot();
        store.save(&snapshot).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(snapshot));
        assert!(!store.temp_path().exists());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"schema_version\": 1"));
    }

    #[tokio::test]
    async fn test_json_file_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remedy.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStateStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
