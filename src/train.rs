//! Training pipeline: `TrainRequest` → sentence graph → dataset → engine.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::dataset::Dataset;
use crate::engine::EngineManager;
use crate::error::{NluError, NluResult};
use crate::graph::GraphBuilder;
use crate::nlulog::{LogEntry, LogLevel, NluLogger};
use crate::types::{ErrorEvent, OutboundMessage, TrainRequest, TrainSuccessEvent};
use crate::vfs::VirtualFs;

const SOURCE: &str = "trainer";

pub struct TrainingPipeline {
    builder: Arc<dyn GraphBuilder>,
    engines: Arc<EngineManager>,
    fs: Arc<dyn VirtualFs>,
    dataset_path: Option<String>,
    logger: Arc<NluLogger>,
}

impl TrainingPipeline {
    pub fn new(
        config: &ServiceConfig,
        builder: Arc<dyn GraphBuilder>,
        engines: Arc<EngineManager>,
        fs: Arc<dyn VirtualFs>,
        logger: Arc<NluLogger>,
    ) -> Self {
        Self {
            builder,
            engines,
            fs,
            dataset_path: config.dataset_path.clone(),
            logger,
        }
    }

    /// Compile the request into a dataset without training.
    pub fn compile(&self, request: &TrainRequest) -> NluResult<Dataset> {
        if request.sentences_by_intent.is_empty() {
            return Err(NluError::TrainingData("No training sentences".into()));
        }

        let graph = self
            .builder
            .build(&request.sentences_by_intent, &request.slots_by_name)?;
        let dataset = Dataset::compile_with_entities(&graph, &request.slots_by_name)?;
        if dataset.is_empty() {
            return Err(NluError::TrainingData("No training sentences".into()));
        }
        Ok(dataset)
    }

    /// Compile, optionally write the dataset, and train a new engine.
    pub async fn train(&self, request: &TrainRequest) -> NluResult<Dataset> {
        let dataset = self.compile(request)?;

        if let Some(path) = &self.dataset_path {
            self.fs.write(path, &dataset.to_yaml()).await?;
            self.logger
                .debug(SOURCE, &format!("Wrote training dataset to {path}"));
        }

        self.engines.train(&dataset).await?;
        Ok(dataset)
    }

    /// Train and report the result as a single outbound message.
    ///
    /// Grammar failures are reported as training-data errors.
    pub async fn handle_train(&self, request: &TrainRequest, site_id: &str) -> OutboundMessage {
        match self.train(request).await {
            Ok(dataset) => {
                self.logger.log(
                    &LogEntry::new(LogLevel::Info, SOURCE, "Training succeeded")
                        .with_site(site_id)
                        .with_session(request.id.as_deref())
                        .with_payload(serde_json::json!({
                            "intents": dataset.intent_names(),
                            "entities": dataset.entities.len(),
                        })),
                );
                OutboundMessage::TrainSuccess {
                    event: TrainSuccessEvent {
                        id: request.id.clone(),
                    },
                    site_id: site_id.to_string(),
                }
            }
            Err(e) => {
                self.logger.log(
                    &LogEntry::new(LogLevel::Error, SOURCE, format!("Training failed: {e}"))
                        .with_site(site_id)
                        .with_session(request.id.as_deref()),
                );
                OutboundMessage::Error(ErrorEvent::from_error(
                    &e,
                    site_id,
                    request.id.clone(),
                    request.id.clone().unwrap_or_default(),
                ))
            }
        }
    }
}
