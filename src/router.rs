//! Message router. Dispatches inbound bus messages and streams responses.
//!
//! ```text
//! InboundMessage ──route()──▶ spawned task ──▶ UnboundedReceiver<OutboundMessage>
//!    Query  → RecognitionHandler
//!    Train  → TrainingPipeline (grammar → dataset → engine)
//!    other  → logged, dropped
//! ```
//!
//! `route` returns immediately; the work runs on its own task, so a long
//! training run never holds up acceptance of the next message. Responses copy
//! the request's site, session and id. A handler that panics still answers
//! with one error event.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::ServiceConfig;
use crate::engine::{EngineFactory, EngineManager};
use crate::error::{NluError, NluResult};
use crate::graph::{GraphBuilder, TemplateGrammar};
use crate::nlulog::{LogEntry, LogLevel, NluLogger};
use crate::recognition::{QueryOutcome, RecognitionHandler};
use crate::train::TrainingPipeline;
use crate::types::{ActivationSignal, ErrorEvent, InboundMessage, OutboundMessage};
use crate::vfs::VirtualFs;

const SOURCE: &str = "router";

pub struct MessageRouter {
    config: Arc<ServiceConfig>,
    engines: Arc<EngineManager>,
    recognizer: Arc<RecognitionHandler>,
    trainer: Arc<TrainingPipeline>,
    activation_tx: mpsc::UnboundedSender<ActivationSignal>,
    activation_rx: Mutex<Option<mpsc::UnboundedReceiver<ActivationSignal>>>,
    logger: Arc<NluLogger>,
}

impl MessageRouter {
    /// Wire every component from configuration, with the default template grammar.
    pub fn from_config(
        config: ServiceConfig,
        factory: Arc<dyn EngineFactory>,
        fs: Arc<dyn VirtualFs>,
        logger: Arc<NluLogger>,
    ) -> NluResult<Self> {
        Self::with_graph_builder(config, factory, Arc::new(TemplateGrammar::new()), fs, logger)
    }

    pub fn with_graph_builder(
        config: ServiceConfig,
        factory: Arc<dyn EngineFactory>,
        builder: Arc<dyn GraphBuilder>,
        fs: Arc<dyn VirtualFs>,
        logger: Arc<NluLogger>,
    ) -> NluResult<Self> {
        config.validate()?;
        let engines = Arc::new(EngineManager::new(
            &config,
            factory,
            fs.clone(),
            logger.clone(),
        )?);
        let recognizer = Arc::new(RecognitionHandler::new(
            &config,
            engines.clone(),
            logger.clone(),
        )?);
        let trainer = Arc::new(TrainingPipeline::new(
            &config,
            builder,
            engines.clone(),
            fs,
            logger.clone(),
        ));
        Ok(Self::new(config, engines, recognizer, trainer, logger))
    }

    /// Assemble from prebuilt components.
    pub fn new(
        config: ServiceConfig,
        engines: Arc<EngineManager>,
        recognizer: Arc<RecognitionHandler>,
        trainer: Arc<TrainingPipeline>,
        logger: Arc<NluLogger>,
    ) -> Self {
        let (activation_tx, activation_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            engines,
            recognizer,
            trainer,
            activation_tx,
            activation_rx: Mutex::new(Some(activation_rx)),
            logger,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn engines(&self) -> &Arc<EngineManager> {
        &self.engines
    }

    /// Activation signals from recognized implicit queries.
    ///
    /// The receiver can be taken once; later calls return `None`.
    pub fn activations(&self) -> Option<mpsc::UnboundedReceiver<ActivationSignal>> {
        self.activation_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Dispatch one message. Must be called inside a Tokio runtime.
    ///
    /// The receiver closes once every response for this message was sent.
    pub fn route(&self, message: InboundMessage) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.logger
            .debug(SOURCE, &format!("Dispatching {:?} message", message.kind()));

        match message {
            InboundMessage::Query(query) => {
                if !self.config.accepts_site(&query.site_id) {
                    self.logger.debug(
                        SOURCE,
                        &format!("Ignoring query for site {}", query.site_id),
                    );
                    return rx;
                }

                let recognizer = self.recognizer.clone();
                let activation_tx = self.activation_tx.clone();
                let logger = self.logger.clone();
                tokio::spawn(async move {
                    let handled = {
                        let query = query.clone();
                        tokio::spawn(async move { recognizer.handle_query(&query).await })
                    };
                    let outcome = match handled.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let err = NluError::RuntimeParse(format!("Query handler failed: {e}"));
                            logger.log(
                                &LogEntry::new(LogLevel::Error, SOURCE, err.to_string())
                                    .with_site(&query.site_id)
                                    .with_session(query.session_id.as_deref()),
                            );
                            QueryOutcome {
                                messages: vec![OutboundMessage::Error(ErrorEvent::from_error(
                                    &err,
                                    query.site_id.clone(),
                                    query.session_id.clone(),
                                    query.input.clone(),
                                ))],
                                activation: None,
                            }
                        }
                    };
                    for message in outcome.messages {
                        let _ = tx.send(message);
                    }
                    if let Some(signal) = outcome.activation {
                        let _ = activation_tx.send(signal);
                    }
                });
            }
            InboundMessage::Train { request, site_id } => {
                if !self.config.accepts_site(&site_id) {
                    self.logger
                        .debug(SOURCE, &format!("Ignoring train for site {site_id}"));
                    return rx;
                }

                let trainer = self.trainer.clone();
                let logger = self.logger.clone();
                tokio::spawn(async move {
                    let handled = {
                        let (request, site_id) = (request.clone(), site_id.clone());
                        tokio::spawn(async move { trainer.handle_train(&request, &site_id).await })
                    };
                    let message = handled.await.unwrap_or_else(|e| {
                        let err = NluError::Other(anyhow::anyhow!("Training handler failed: {e}"));
                        logger.log(
                            &LogEntry::new(LogLevel::Error, SOURCE, err.to_string())
                                .with_site(&site_id)
                                .with_session(request.id.as_deref()),
                        );
                        OutboundMessage::Error(ErrorEvent::from_error(
                            &err,
                            site_id.clone(),
                            request.id.clone(),
                            request.id.clone().unwrap_or_default(),
                        ))
                    });
                    let _ = tx.send(message);
                });
            }
            InboundMessage::Unknown { topic } => {
                self.logger
                    .warn(SOURCE, &format!("Unexpected message on {topic}"));
            }
        }

        rx
    }

    /// Decode a raw bus message and dispatch it.
    ///
    /// An undecodable payload yields a single error event for the default site.
    pub fn route_topic(
        &self,
        topic: &str,
        payload: &str,
    ) -> mpsc::UnboundedReceiver<OutboundMessage> {
        match InboundMessage::from_topic(topic, payload) {
            Ok(message) => self.route(message),
            Err(e) => {
                self.logger.log(
                    &LogEntry::new(LogLevel::Error, SOURCE, format!("Bad payload: {e}"))
                        .with_payload(serde_json::json!({ "topic": topic })),
                );
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(OutboundMessage::Error(ErrorEvent::from_error(
                    &e,
                    self.config.default_train_site_id.clone(),
                    None,
                    topic,
                )));
                rx
            }
        }
    }

    /// Dispatch and wait for every response.
    pub async fn route_all(&self, message: InboundMessage) -> Vec<OutboundMessage> {
        collect(self.route(message)).await
    }
}

/// Drain a response stream until it closes.
pub async fn collect(mut rx: mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Some(message) = rx.recv().await {
        messages.push(message);
    }
    messages
}
