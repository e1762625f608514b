//! Engine lifecycle. Owns the single active engine.
//!
//! ```text
//!  Unloaded ──load_from_snapshot──▶ Ready
//!     │                              ▲
//!     └──────────train───────────────┘   (train on Ready replaces the engine)
//! ```
//!
//! Readers clone the `Arc` under a short read lock and parse without holding
//! it, so a swap never blocks or tears an in-flight parse. Training fits a
//! fresh engine on a separate task, persists it, and only then swaps it in.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};

use crate::config::ServiceConfig;
use crate::dataset::Dataset;
use crate::error::{NluError, NluResult};
use crate::nlulog::{LogEntry, LogLevel, NluLogger};
use crate::snapshot::{EngineSnapshot, SnapshotStore};
use crate::vfs::VirtualFs;

use super::{EngineFactory, NluEngine};

const SOURCE: &str = "engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Ready,
}

pub struct EngineManager {
    language: String,
    factory: Arc<dyn EngineFactory>,
    store: Option<SnapshotStore>,
    persist: bool,
    active: RwLock<Option<Arc<dyn NluEngine>>>,
    /// One training run at a time.
    training: Mutex<()>,
    logger: Arc<NluLogger>,
}

impl EngineManager {
    /// Fails with `Configuration` for an unsupported language.
    pub fn new(
        config: &ServiceConfig,
        factory: Arc<dyn EngineFactory>,
        fs: Arc<dyn VirtualFs>,
        logger: Arc<NluLogger>,
    ) -> NluResult<Self> {
        if !config.language_supported() {
            return Err(NluError::Configuration(format!(
                "Snips language not supported: {}",
                config.language
            )));
        }

        Ok(Self {
            language: config.language.clone(),
            factory,
            store: config
                .engine_path
                .as_ref()
                .map(|path| SnapshotStore::new(fs, path.clone())),
            persist: config.persists_snapshots(),
            active: RwLock::new(None),
            training: Mutex::new(()),
            logger,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Current engine, if any.
    pub async fn active(&self) -> Option<Arc<dyn NluEngine>> {
        self.active.read().await.clone()
    }

    pub async fn state(&self) -> EngineState {
        if self.active.read().await.is_some() {
            EngineState::Ready
        } else {
            EngineState::Unloaded
        }
    }

    /// Restore the engine from the configured snapshot.
    ///
    /// Returns `Ok(false)` when no path is configured or nothing was saved yet;
    /// the manager then stays as it was.
    pub async fn load_from_snapshot(&self) -> NluResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(snapshot) = store.load().await? else {
            self.logger
                .debug(SOURCE, &format!("No engine snapshot at {}", store.path()));
            return Ok(false);
        };

        let engine: Arc<dyn NluEngine> =
            Arc::from(self.factory.restore(&self.language, snapshot.engine)?);
        *self.active.write().await = Some(engine);

        self.logger.log(
            &LogEntry::new(LogLevel::Debug, SOURCE, "Loaded engine snapshot").with_payload(
                json!({
                    "path": store.path(),
                    "trained_at": snapshot.trained_at.to_rfc3339(),
                }),
            ),
        );
        Ok(true)
    }

    /// Active engine, loading the snapshot on first use.
    ///
    /// Fails with `EngineNotReady` if there is neither an engine nor a
    /// loadable snapshot.
    pub async fn ensure_ready(&self) -> NluResult<Arc<dyn NluEngine>> {
        if let Some(engine) = self.active().await {
            return Ok(engine);
        }

        // Another query may have loaded while we waited; let the first one win.
        let loaded = {
            let _guard = self.training.lock().await;
            if let Some(engine) = self.active().await {
                return Ok(engine);
            }
            match self.load_from_snapshot().await {
                Ok(loaded) => loaded,
                Err(e) => {
                    self.logger
                        .warn(SOURCE, &format!("Failed to load engine snapshot: {e}"));
                    false
                }
            }
        };

        if loaded {
            if let Some(engine) = self.active().await {
                return Ok(engine);
            }
        }
        Err(NluError::EngineNotReady)
    }

    /// Fit a fresh engine on `dataset`, persist it, then make it active.
    ///
    /// On any failure the previously active engine stays in place.
    pub async fn train(&self, dataset: &Dataset) -> NluResult<Arc<dyn NluEngine>> {
        let _guard = self.training.lock().await;

        self.logger.debug(
            SOURCE,
            &format!("Creating empty engine (language={})", self.language),
        );
        let mut engine = self.factory.create(&self.language)?;
        let owned = dataset.clone();
        let started = Instant::now();

        let engine = tokio::spawn(async move {
            engine.fit(&owned).await?;
            Ok::<_, NluError>(engine)
        })
        .await
        .map_err(|e| NluError::Other(anyhow::anyhow!("Training task failed: {e}")))??;
        let engine: Arc<dyn NluEngine> = Arc::from(engine);

        self.logger.log(
            &LogEntry::new(LogLevel::Debug, SOURCE, "Trained engine").with_payload(json!({
                "seconds": started.elapsed().as_secs_f64(),
                "intents": dataset.intents.len(),
                "utterances": dataset.utterance_count(),
            })),
        );

        if let (true, Some(store)) = (self.persist, &self.store) {
            let snapshot = EngineSnapshot::new(self.language.clone(), engine.snapshot()?);
            store.save(&snapshot).await?;
            self.logger
                .debug(SOURCE, &format!("Saved engine to {}", store.path()));
        }

        *self.active.write().await = Some(engine.clone());
        Ok(engine)
    }
}
