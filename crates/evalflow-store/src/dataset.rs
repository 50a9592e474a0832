use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evalflow_types::DataItem;
use serde::{Deserialize, Serialize};

use crate::{BlobStore, FsBlobStore, Result, StoreError, DATASETS_DIR, STATE_DIR};

/// On-disk shape of a cached dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub timestamp: DateTime<Utc>,
    pub data: Vec<DataItem>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    timestamp: DateTime<Utc>,
    data: &'a [DataItem],
}

/// Dataset snapshots keyed by dataset name. Presence of the blob is the cache-hit signal.
#[derive(Clone)]
pub struct DatasetCache {
    store: Arc<dyn BlobStore>,
}

impl DatasetCache {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Cache under `<root>/.evalflow/datasets/<name>.json`.
    pub fn in_project(root: impl AsRef<Path>) -> Self {
        let dir = root.as_ref().join(STATE_DIR).join(DATASETS_DIR);
        Self::new(Arc::new(FsBlobStore::new(dir)))
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.store.exists(name).await
    }

    pub async fn load_snapshot(&self, name: &str) -> Result<Option<DatasetSnapshot>> {
        let Some(bytes) = self.store.get(name).await? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            key: name.to_string(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    pub async fn load(&self, name: &str) -> Result<Option<Vec<DataItem>>> {
        Ok(self.load_snapshot(name).await?.map(|s| s.data))
    }

    /// Returns `false` when a snapshot already exists and `overwrite` is not set.
    pub async fn save(&self, name: &str, items: &[DataItem], overwrite: bool) -> Result<bool> {
        let snapshot = SnapshotRef {
            timestamp: Utc::now(),
            data: items,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let written = self.store.put(name, &bytes, overwrite).await?;
        tracing::debug!(dataset = name, items = items.len(), written, "dataset snapshot save");
        Ok(written)
    }
}

impl std::fmt::Debug for DatasetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlobStore;
    use serde_json::json;

    fn items() -> Vec<DataItem> {
        vec![
            DataItem::new(json!("sky"), json!("blue")).with_extra("topic", json!("color")),
            DataItem::new(json!("grass"), json!("green")),
        ]
    }

    #[tokio::test]
    async fn snapshot_layout_in_project() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DatasetCache::in_project(dir.path());
        assert!(cache.save("colors", &items(), false).await.unwrap());

        let path = dir.path().join(".evalflow").join("datasets").join("colors.json");
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(raw["timestamp"].is_string());
        assert_eq!(raw["data"][0]["input"], json!("sky"));
        assert_eq!(raw["data"][0]["topic"], json!("color"));
    }

    #[tokio::test]
    async fn load_returns_saved_items() {
        let cache = DatasetCache::new(Arc::new(MemoryBlobStore::new()));
        assert_eq!(cache.load("colors").await.unwrap(), None);

        cache.save("colors", &items(), false).await.unwrap();
        assert!(cache.exists("colors").await.unwrap());
        assert_eq!(cache.load("colors").await.unwrap(), Some(items()));

        // write-once
        let other = vec![DataItem::new(json!("sun"), json!("yellow"))];
        assert!(!cache.save("colors", &other, false).await.unwrap());
        assert_eq!(cache.load("colors").await.unwrap(), Some(items()));
        assert!(cache.save("colors", &other, true).await.unwrap());
        assert_eq!(cache.load("colors").await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn malformed_snapshot_is_reported() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("broken", b"not json", false).await.unwrap();
        let cache = DatasetCache::new(store);
        let err = cache.load("broken").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }
}
