use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::NluResult;

use super::VirtualFs;

/// `tokio::fs` under a root directory. Absolute config paths work with a
/// root of `/`.
pub struct NativeFs {
    root: PathBuf,
}

impl NativeFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn ensure_parent(path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => tokio::fs::create_dir_all(parent).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VirtualFs for NativeFs {
    async fn read_to_string(&self, path: &str) -> NluResult<String> {
        Ok(tokio::fs::read_to_string(self.full_path(path)).await?)
    }

    async fn write(&self, path: &str, contents: &str) -> NluResult<()> {
        let target = self.full_path(path);
        Self::ensure_parent(&target).await?;
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> NluResult<bool> {
        Ok(tokio::fs::try_exists(self.full_path(path)).await?)
    }

    async fn remove_file(&self, path: &str) -> NluResult<()> {
        match tokio::fs::remove_file(self.full_path(path)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> NluResult<()> {
        let target = self.full_path(to);
        Self::ensure_parent(&target).await?;
        tokio::fs::rename(self.full_path(from), &target).await?;
        Ok(())
    }
}
