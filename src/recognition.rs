//! Recognition handler: one query in, one correlated response set out.
//!
//! Pipeline: number replacement → casing (per [`CasingScope`]) → engine parse →
//! activation policy. Explicit queries are recognized whenever the engine
//! names an intent; implicit ones only above the confidence threshold, and
//! those also raise an [`ActivationSignal`].

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::engine::EngineManager;
use crate::error::{NluError, NluResult};
use crate::nlulog::{LogEntry, LogLevel, NluLogger};
use crate::normalize::{replacer_for_language, Casing, CasingScope, NumberReplacer};
use crate::types::{
    ActivationSignal, AsrToken, ErrorEvent, Intent, IntentEvent, NotRecognizedEvent,
    OutboundMessage, ParsedEvent, Query, RecognitionResult,
};

const SOURCE: &str = "recognizer";

/// Query text after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInput {
    /// Handed to the engine.
    pub engine_text: String,
    /// Echoed back in events.
    pub echo_text: String,
}

/// Everything produced for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub messages: Vec<OutboundMessage>,
    pub activation: Option<ActivationSignal>,
}

pub struct RecognitionHandler {
    engines: Arc<EngineManager>,
    casing: Casing,
    casing_scope: CasingScope,
    replacer: Option<Arc<dyn NumberReplacer>>,
    implicit_threshold: f64,
    logger: Arc<NluLogger>,
}

impl RecognitionHandler {
    /// Uses the built-in number replacer for the configured locale.
    pub fn new(
        config: &ServiceConfig,
        engines: Arc<EngineManager>,
        logger: Arc<NluLogger>,
    ) -> NluResult<Self> {
        Self::with_number_replacer(config, engines, None, logger)
    }

    /// Fails with `Configuration` if number replacement is on and neither
    /// `replacer` nor a built-in one covers the locale.
    pub fn with_number_replacer(
        config: &ServiceConfig,
        engines: Arc<EngineManager>,
        replacer: Option<Arc<dyn NumberReplacer>>,
        logger: Arc<NluLogger>,
    ) -> NluResult<Self> {
        let replacer = if config.replace_numbers {
            let language = config.number_language();
            let replacer = replacer
                .or_else(|| replacer_for_language(language))
                .ok_or_else(|| {
                    NluError::Configuration(format!(
                        "No number replacement available for language: {language}"
                    ))
                })?;
            Some(replacer)
        } else {
            None
        };

        Ok(Self {
            engines,
            casing: config.casing,
            casing_scope: config.casing_scope,
            replacer,
            implicit_threshold: config.implicit_threshold,
            logger,
        })
    }

    pub fn normalize(&self, input: &str) -> NormalizedInput {
        let replaced = match &self.replacer {
            Some(replacer) => {
                let words: Vec<&str> = input.split_whitespace().collect();
                replacer.replace_numbers(&words).join(" ")
            }
            None => input.to_string(),
        };

        let cased = |apply: bool| {
            if apply {
                self.casing.apply(&replaced)
            } else {
                replaced.clone()
            }
        };

        NormalizedInput {
            engine_text: cased(self.casing_scope.applies_to_engine()),
            echo_text: cased(self.casing_scope.applies_to_echo()),
        }
    }

    /// Whether an outcome counts as recognized under the activation policy.
    pub fn accepts(&self, confidence: f64, implicit: bool) -> bool {
        !implicit || confidence > self.implicit_threshold
    }

    /// Run the engine on already-normalized text.
    ///
    /// `Ok(None)` means not recognized.
    pub async fn recognize(
        &self,
        text: &str,
        intent_filter: Option<&[String]>,
        implicit: bool,
    ) -> NluResult<Option<RecognitionResult>> {
        let engine = self.engines.ensure_ready().await?;
        let outcome = engine
            .parse(text, intent_filter)
            .await
            .map_err(|e| match e {
                NluError::RuntimeParse(_) => e,
                other => NluError::RuntimeParse(other.to_string()),
            })?;

        let Some(intent) = outcome.intent else {
            return Ok(None);
        };
        if !self.accepts(intent.confidence_score, implicit) {
            self.logger.debug(
                SOURCE,
                &format!(
                    "Implicit match {} at {:.2} is below threshold {:.2}",
                    intent.intent_name, intent.confidence_score, self.implicit_threshold
                ),
            );
            return Ok(None);
        }

        Ok(Some(RecognitionResult {
            intent_name: intent.intent_name,
            confidence: intent.confidence_score,
            slots: outcome.slots,
        }))
    }

    /// Full query handling; never fails, errors become an [`ErrorEvent`].
    pub async fn handle_query(&self, query: &Query) -> QueryOutcome {
        match self.try_handle_query(query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.logger.log(
                    &LogEntry::new(LogLevel::Error, SOURCE, format!("Query failed: {e}"))
                        .with_site(&query.site_id)
                        .with_session(query.session_id.as_deref()),
                );
                QueryOutcome {
                    messages: vec![OutboundMessage::Error(ErrorEvent::from_error(
                        &e,
                        query.site_id.clone(),
                        query.session_id.clone(),
                        query.input.clone(),
                    ))],
                    activation: None,
                }
            }
        }
    }

    async fn try_handle_query(&self, query: &Query) -> NluResult<QueryOutcome> {
        let normalized = self.normalize(&query.input);
        let result = self
            .recognize(
                &normalized.engine_text,
                query.intent_filter.as_deref(),
                query.implicit,
            )
            .await?;

        let Some(result) = result else {
            self.logger.log(
                &LogEntry::new(LogLevel::Debug, SOURCE, "Intent not recognized")
                    .with_site(&query.site_id)
                    .with_session(query.session_id.as_deref()),
            );
            return Ok(QueryOutcome {
                messages: vec![OutboundMessage::NotRecognized(NotRecognizedEvent {
                    input: normalized.echo_text,
                    implicit: query.implicit,
                    id: query.id.clone(),
                    site_id: query.site_id.clone(),
                    session_id: query.session_id.clone(),
                })],
                activation: None,
            });
        };

        self.logger.log(
            &LogEntry::new(
                LogLevel::Debug,
                SOURCE,
                format!("Recognized {}", result.intent_name),
            )
            .with_site(&query.site_id)
            .with_session(query.session_id.as_deref())
            .with_payload(serde_json::json!({
                "confidence": result.confidence,
                "slots": result.slots.len(),
            })),
        );

        let intent = Intent {
            intent_name: result.intent_name.clone(),
            confidence_score: result.confidence,
        };
        let parsed = ParsedEvent {
            input: normalized.echo_text.clone(),
            id: query.id.clone(),
            site_id: query.site_id.clone(),
            session_id: query.session_id.clone(),
            intent: intent.clone(),
            slots: result.slots.clone(),
        };
        let intent_event = IntentEvent {
            asr_tokens: vec![AsrToken::from_words(normalized.echo_text.split_whitespace())],
            input: normalized.echo_text,
            id: query.id.clone(),
            site_id: query.site_id.clone(),
            session_id: query.session_id.clone(),
            intent,
            slots: result.slots,
            raw_input: query.input.clone(),
            wakeword_id: query.wakeword_id.clone(),
        };

        let activation = query.implicit.then(|| ActivationSignal {
            intent_name: result.intent_name,
            confidence: result.confidence,
            id: query.id.clone(),
            site_id: query.site_id.clone(),
            session_id: query.session_id.clone(),
        });

        Ok(QueryOutcome {
            messages: vec![
                OutboundMessage::Parsed(parsed),
                OutboundMessage::Intent(intent_event),
            ],
            activation,
        })
    }
}
