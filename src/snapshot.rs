//! Engine snapshot store, one JSON envelope per configured path.
//!
//! The envelope carries format metadata around the engine's opaque state:
//!
//! ```json
//! { "format_version": 1, "language": "en", "trained_at": "...", "engine": { ... } }
//! ```
//!
//! Saves go to `<path>.tmp` first and are renamed over the target, so a
//! concurrent reader sees either the previous snapshot or the new one.
//!
//! Storage uses `VirtualFs`, so tests run against `MemoryFs`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NluError, NluResult};
use crate::vfs::VirtualFs;

/// Current envelope layout.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    pub format_version: u32,
    pub language: String,
    /// When the engine was trained.
    pub trained_at: DateTime<Utc>,
    /// Engine state, opaque to the store.
    pub engine: serde_json::Value,
}

impl EngineSnapshot {
    pub fn new(language: impl Into<String>, engine: serde_json::Value) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            language: language.into(),
            trained_at: Utc::now(),
            engine,
        }
    }
}

/// Reads and atomically replaces the snapshot at one path.
pub struct SnapshotStore {
    fs: Arc<dyn VirtualFs>,
    path: String,
}

impl SnapshotStore {
    pub fn new(fs: Arc<dyn VirtualFs>, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn temp_path(&self) -> String {
        format!("{}.tmp", self.path)
    }

    pub async fn exists(&self) -> NluResult<bool> {
        self.fs.exists(&self.path).await
    }

    /// Replace the stored snapshot, overwriting any previous one.
    pub async fn save(&self, snapshot: &EngineSnapshot) -> NluResult<()> {
        let content = serde_json::to_string(snapshot)?;
        let temp = self.temp_path();

        self.fs.write(&temp, &content).await?;
        if let Err(e) = self.fs.rename(&temp, &self.path).await {
            // Leave no half-finished temp file behind.
            let _ = self.fs.remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Load the stored snapshot, or `None` if nothing has been saved yet.
    pub async fn load(&self) -> NluResult<Option<EngineSnapshot>> {
        if !self.fs.exists(&self.path).await? {
            return Ok(None);
        }

        let content = self.fs.read_to_string(&self.path).await?;
        let snapshot: EngineSnapshot = serde_json::from_str(&content)?;
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(NluError::Configuration(format!(
                "Snapshot format version {} is newer than supported {}",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;
    use serde_json::json;

    fn store() -> (Arc<MemoryFs>, SnapshotStore) {
        let fs = Arc::new(MemoryFs::new());
        let store = SnapshotStore::new(fs.clone(), "profiles/en/engine.json");
        (fs, store)
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let (_, store) = store();
        assert!(!store.exists().await.unwrap());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let (_, store) = store();
        let snapshot = EngineSnapshot::new("en", json!({"weights": [1, 2, 3]}));
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.format_version, SNAPSHOT_FORMAT_VERSION);
    }

    #[tokio::test]
    async fn save_overwrites_and_cleans_temp() {
        let (fs, store) = store();
        store
            .save(&EngineSnapshot::new("en", json!({"v": 1})))
            .await
            .unwrap();
        store
            .save(&EngineSnapshot::new("en", json!({"v": 2})))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.engine, json!({"v": 2}));
        assert!(!fs.exists("profiles/en/engine.json.tmp").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_serialization_error() {
        let (fs, store) = store();
        fs.write(store.path(), "not json").await.unwrap();
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, NluError::Serialization(_)));
    }

    #[tokio::test]
    async fn newer_format_rejected() {
        let (fs, store) = store();
        let mut snapshot = EngineSnapshot::new("en", json!({}));
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        fs.write(store.path(), &serde_json::to_string(&snapshot).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            store.load().await.unwrap_err(),
            NluError::Configuration(_)
        ));
    }
}
