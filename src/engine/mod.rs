//! Engine abstraction: the black-box recognizer the service drives.
//!
//! [`NluEngine`] covers the four operations the service needs (`parse`, `fit`,
//! snapshot, restore via [`EngineFactory`]). [`EngineManager`] owns the single
//! active engine and swaps it atomically after training.

use async_trait::async_trait;

use crate::dataset::Dataset;
use crate::error::NluResult;
use crate::types::{Intent, Slot};

pub mod manager;
pub mod template;

pub use manager::{EngineManager, EngineState};
pub use template::{TemplateEngine, TemplateEngineFactory};

/// What the engine made of one input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// `None` when no intent matched.
    pub intent: Option<Intent>,
    pub slots: Vec<Slot>,
}

impl ParseOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn intent_name(&self) -> Option<&str> {
        self.intent.as_ref().map(|i| i.intent_name.as_str())
    }

    pub fn confidence(&self) -> f64 {
        self.intent.as_ref().map_or(0.0, |i| i.confidence_score)
    }
}

/// Intent recognizer.
#[async_trait]
pub trait NluEngine: Send + Sync {
    fn language(&self) -> &str;

    /// Classify `text`, optionally restricted to `intent_filter`.
    async fn parse(&self, text: &str, intent_filter: Option<&[String]>)
        -> NluResult<ParseOutcome>;

    /// Train in place against `dataset`.
    async fn fit(&mut self, dataset: &Dataset) -> NluResult<()>;

    /// Opaque serialized state, restorable through [`EngineFactory::restore`].
    fn snapshot(&self) -> NluResult<serde_json::Value>;
}

/// Builds fresh engines and rehydrates snapshots.
pub trait EngineFactory: Send + Sync {
    /// Empty, untrained engine for `language`.
    fn create(&self, language: &str) -> NluResult<Box<dyn NluEngine>>;

    fn restore(
        &self,
        language: &str,
        state: serde_json::Value,
    ) -> NluResult<Box<dyn NluEngine>>;
}
