use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{NluError, NluResult};

use super::VirtualFs;

/// Files in a map keyed by trimmed path. Directories exist implicitly while
/// they contain a file.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn files(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn not_found(path: &str) -> NluError {
        NluError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No such file: {path}"),
        ))
    }
}

#[async_trait]
impl VirtualFs for MemoryFs {
    async fn read_to_string(&self, path: &str) -> NluResult<String> {
        let key = Self::key(path);
        self.files()
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(&key))
    }

    async fn write(&self, path: &str, contents: &str) -> NluResult<()> {
        self.files().insert(Self::key(path), contents.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> NluResult<bool> {
        let key = Self::key(path);
        let prefix = format!("{key}/");
        let files = self.files();
        Ok(files.contains_key(&key) || files.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn remove_file(&self, path: &str) -> NluResult<()> {
        self.files().remove(&Self::key(path));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> NluResult<()> {
        let from = Self::key(from);
        let mut files = self.files();
        let contents = files.remove(&from).ok_or_else(|| Self::not_found(&from))?;
        files.insert(Self::key(to), contents);
        Ok(())
    }
}
