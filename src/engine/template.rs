//! Deterministic template-matching engine.
//!
//! Fitting records every utterance of the dataset verbatim. Parsing matches
//! the whitespace tokens of the input against each template
//! case-insensitively, with backtracking over slot spans:
//! - custom entity slots bind one of the entity's known values, or any span
//!   when the entity has no values;
//! - `snips/number` slots bind a digit token or a run of English number words.
//!
//! A full match reports confidence 1.0; anything else is "no intent".

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dataset::{Dataset, Utterance, UtteranceChunk, SNIPS_NUMBER};
use crate::error::{NluError, NluResult};
use crate::normalize::EnglishNumbers;
use crate::types::{Intent, Slot, SlotRange};

use super::{EngineFactory, NluEngine, ParseOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateState {
    language: String,
    dataset: Option<Dataset>,
}

/// Input word with its character span.
#[derive(Debug, Clone)]
struct InputToken {
    lower: String,
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<InputToken> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (pos, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            if let Some((start, word)) = current.take() {
                tokens.push(InputToken {
                    lower: word.to_lowercase(),
                    start,
                    end: pos,
                });
            }
        } else {
            current.get_or_insert_with(|| (pos, String::new())).1.push(c);
        }
    }
    if let Some((start, word)) = current {
        let end = start + word.chars().count();
        tokens.push(InputToken {
            lower: word.to_lowercase(),
            start,
            end,
        });
    }
    tokens
}

/// Slot bound to tokens `[first, last)`.
#[derive(Debug, Clone)]
struct Binding {
    slot_name: String,
    entity: String,
    first: usize,
    last: usize,
    value: serde_json::Value,
}

/// Entity values pre-split into lowercase words, longest first.
type EntityIndex = BTreeMap<String, Vec<(Vec<String>, String)>>;

fn index_entities(dataset: &Dataset) -> EntityIndex {
    dataset
        .entities
        .iter()
        .map(|(name, values)| {
            let mut split: Vec<(Vec<String>, String)> = values
                .iter()
                .map(|v| {
                    let words = v.split_whitespace().map(str::to_lowercase).collect();
                    (words, v.clone())
                })
                .filter(|(words, _): &(Vec<String>, String)| !words.is_empty())
                .collect();
            split.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            (name.clone(), split)
        })
        .collect()
}

struct Matcher<'a> {
    tokens: &'a [InputToken],
    entities: &'a EntityIndex,
}

impl Matcher<'_> {
    fn match_from(
        &self,
        chunks: &[UtteranceChunk],
        at: usize,
        bindings: &mut Vec<Binding>,
    ) -> bool {
        let Some((chunk, rest)) = chunks.split_first() else {
            return at == self.tokens.len();
        };

        match chunk {
            UtteranceChunk::Text(word) => {
                self.tokens
                    .get(at)
                    .is_some_and(|t| t.lower == word.to_lowercase())
                    && self.match_from(rest, at + 1, bindings)
            }
            UtteranceChunk::Slot { slot_name, entity } => {
                for (len, value) in self.slot_candidates(entity, at) {
                    bindings.push(Binding {
                        slot_name: slot_name.clone(),
                        entity: entity.clone(),
                        first: at,
                        last: at + len,
                        value,
                    });
                    if self.match_from(rest, at + len, bindings) {
                        return true;
                    }
                    bindings.pop();
                }
                false
            }
        }
    }

    /// `(token count, normalized value)` options for a slot starting at `at`.
    fn slot_candidates(&self, entity: &str, at: usize) -> Vec<(usize, serde_json::Value)> {
        let remaining = &self.tokens[at.min(self.tokens.len())..];
        if remaining.is_empty() {
            return Vec::new();
        }

        if entity == SNIPS_NUMBER {
            let mut candidates = Vec::new();
            if let Ok(n) = remaining[0].lower.parse::<i64>() {
                candidates.push((1, number_value(n)));
            }
            let words: Vec<&str> = remaining.iter().map(|t| t.lower.as_str()).collect();
            for len in (1..=words.len()).rev() {
                if let Some((n, consumed)) = EnglishNumbers::parse_words(&words[..len]) {
                    if consumed == len {
                        candidates.push((len, number_value(n)));
                    }
                }
            }
            return candidates;
        }

        match self.entities.get(entity) {
            Some(values) if !values.is_empty() => values
                .iter()
                .filter(|(words, _)| {
                    words.len() <= remaining.len()
                        && words.iter().zip(remaining).all(|(w, t)| *w == t.lower)
                })
                .map(|(words, original)| (words.len(), custom_value(original)))
                .collect(),
            // No known values: any non-empty span, shortest first.
            _ => (1..=remaining.len())
                .map(|len| {
                    let raw: Vec<&str> =
                        remaining[..len].iter().map(|t| t.lower.as_str()).collect();
                    (len, custom_value(&raw.join(" ")))
                })
                .collect(),
        }
    }
}

fn number_value(n: i64) -> serde_json::Value {
    json!({ "kind": "Number", "value": n as f64 })
}

fn custom_value(value: &str) -> serde_json::Value {
    json!({ "kind": "Custom", "value": value })
}

/// Reference engine usable without an external recognizer.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    language: String,
    dataset: Option<Dataset>,
    entities: EntityIndex,
}

impl TemplateEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            dataset: None,
            entities: EntityIndex::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.dataset.is_some()
    }

    fn from_state(state: TemplateState) -> Self {
        let entities = state.dataset.as_ref().map(index_entities).unwrap_or_default();
        Self {
            language: state.language,
            dataset: state.dataset,
            entities,
        }
    }

    fn match_utterance(
        &self,
        chars: &[char],
        tokens: &[InputToken],
        utterance: &Utterance,
    ) -> Option<Vec<Slot>> {
        let matcher = Matcher {
            tokens,
            entities: &self.entities,
        };
        let mut bindings = Vec::new();
        if !matcher.match_from(&utterance.chunks, 0, &mut bindings) {
            return None;
        }

        let slots = bindings
            .into_iter()
            .map(|b| {
                let start = tokens[b.first].start;
                let end = tokens[b.last - 1].end;
                Slot {
                    slot_name: b.slot_name,
                    entity: b.entity,
                    raw_value: chars[start..end].iter().collect(),
                    value: b.value,
                    range: SlotRange { start, end },
                }
            })
            .collect();
        Some(slots)
    }
}

#[async_trait]
impl NluEngine for TemplateEngine {
    fn language(&self) -> &str {
        &self.language
    }

    async fn parse(
        &self,
        text: &str,
        intent_filter: Option<&[String]>,
    ) -> NluResult<ParseOutcome> {
        let Some(dataset) = &self.dataset else {
            return Ok(ParseOutcome::none());
        };

        let allowed = |name: &str| match intent_filter {
            Some(filter) if !filter.is_empty() => filter.iter().any(|f| f == name),
            _ => true,
        };

        let chars: Vec<char> = text.chars().collect();
        let tokens = tokenize(text);

        for intent in dataset.intents.iter().filter(|i| allowed(&i.name)) {
            for utterance in &intent.utterances {
                if let Some(slots) = self.match_utterance(&chars, &tokens, utterance) {
                    return Ok(ParseOutcome {
                        intent: Some(Intent {
                            intent_name: intent.name.clone(),
                            confidence_score: 1.0,
                        }),
                        slots,
                    });
                }
            }
        }

        Ok(ParseOutcome::none())
    }

    async fn fit(&mut self, dataset: &Dataset) -> NluResult<()> {
        if dataset.is_empty() {
            return Err(NluError::TrainingData("Dataset has no utterances".into()));
        }
        self.entities = index_entities(dataset);
        self.dataset = Some(dataset.clone());
        Ok(())
    }

    fn snapshot(&self) -> NluResult<serde_json::Value> {
        let state = TemplateState {
            language: self.language.clone(),
            dataset: self.dataset.clone(),
        };
        Ok(serde_json::to_value(state)?)
    }
}

/// Factory for [`TemplateEngine`].
#[derive(Debug, Clone, Default)]
pub struct TemplateEngineFactory;

impl EngineFactory for TemplateEngineFactory {
    fn create(&self, language: &str) -> NluResult<Box<dyn NluEngine>> {
        Ok(Box::new(TemplateEngine::new(language)))
    }

    fn restore(
        &self,
        language: &str,
        state: serde_json::Value,
    ) -> NluResult<Box<dyn NluEngine>> {
        let state: TemplateState = serde_json::from_value(state)?;
        if state.language != language {
            return Err(NluError::Configuration(format!(
                "Snapshot language '{}' does not match configured '{language}'",
                state.language
            )));
        }
        Ok(Box::new(TemplateEngine::from_state(state)))
    }
}
