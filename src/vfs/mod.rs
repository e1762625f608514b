//! Storage seam for engine snapshots and dataset dumps.
//!
//! Paths are logical, `/`-separated strings. [`MemoryFs`] keeps everything in
//! a map; [`NativeFs`] (default `native` feature) maps paths under a root
//! directory through `tokio::fs`.

use async_trait::async_trait;

use crate::error::NluResult;

mod memory;
#[cfg(feature = "native")]
mod native;

pub use memory::MemoryFs;
#[cfg(feature = "native")]
pub use native::NativeFs;

#[async_trait]
pub trait VirtualFs: Send + Sync {
    /// Missing files fail with `NluError::Io` (`NotFound`).
    async fn read_to_string(&self, path: &str) -> NluResult<String>;

    /// Create or truncate, creating parent directories as needed.
    async fn write(&self, path: &str, contents: &str) -> NluResult<()>;

    async fn exists(&self, path: &str) -> NluResult<bool>;

    /// Removing a missing file succeeds.
    async fn remove_file(&self, path: &str) -> NluResult<()>;

    /// Move `from` onto `to` in one step, replacing `to` if present.
    async fn rename(&self, from: &str, to: &str) -> NluResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NluError;

    async fn exercise(fs: &dyn VirtualFs) {
        assert!(!fs.exists("snips/engine.json").await.unwrap());
        assert!(matches!(
            fs.read_to_string("snips/engine.json").await,
            Err(NluError::Io(_))
        ));

        fs.write("snips/engine.json", "{\"v\":1}").await.unwrap();
        fs.write("snips/engine.json", "{\"v\":2}").await.unwrap();
        assert_eq!(
            fs.read_to_string("snips/engine.json").await.unwrap(),
            "{\"v\":2}"
        );
        assert!(fs.exists("snips").await.unwrap());

        fs.write("snips/engine.json.tmp", "{\"v\":3}").await.unwrap();
        fs.rename("snips/engine.json.tmp", "snips/engine.json")
            .await
            .unwrap();
        assert!(!fs.exists("snips/engine.json.tmp").await.unwrap());
        assert_eq!(
            fs.read_to_string("snips/engine.json").await.unwrap(),
            "{\"v\":3}"
        );
        assert!(fs.rename("snips/gone.tmp", "snips/engine.json").await.is_err());

        fs.remove_file("snips/engine.json").await.unwrap();
        fs.remove_file("snips/engine.json").await.unwrap();
        assert!(!fs.exists("snips/engine.json").await.unwrap());
    }

    #[tokio::test]
    async fn memory_fs_contract() {
        exercise(&MemoryFs::new()).await;
    }

    #[tokio::test]
    async fn memory_fs_ignores_outer_slashes() {
        let fs = MemoryFs::new();
        fs.write("/profiles/en/dataset.yaml/", "---").await.unwrap();
        assert!(fs.exists("profiles/en/dataset.yaml").await.unwrap());
        assert!(fs.exists("/profiles/en").await.unwrap());
        assert!(!fs.exists("profiles/e").await.unwrap());
    }

    #[cfg(feature = "native")]
    #[tokio::test]
    async fn native_fs_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&NativeFs::new(dir.path())).await;
        assert!(dir.path().join("snips").is_dir());
    }
}
