//! Dataset compiler: sentence graph → training corpus.
//!
//! Each path from an intent root to the end node becomes one [`Utterance`].
//! Slot spans are delimited by begin/end markers on the path; literal words
//! captured inside a slot become values of that slot's entity unless the slot
//! names an explicit entity source.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NluError, NluResult};
use crate::graph::{OutputLabel, SentenceGraph};

mod yaml;

/// Upstream numeric source.
pub const RHASSPY_NUMBER: &str = "rhasspy/number";
/// Built-in numeric entity of the engine.
pub const SNIPS_NUMBER: &str = "snips/number";

/// Strip a leading `$` and any `,args` suffix (`$color,extra` → `color`).
pub fn normalize_entity_name(name: &str) -> String {
    match name.strip_prefix('$') {
        Some(rest) => rest.split(',').next().unwrap_or(rest).to_string(),
        None => name.to_string(),
    }
}

/// Entities the engine supplies itself; never redefined in a dataset.
pub fn is_builtin_entity(name: &str) -> bool {
    name.starts_with("snips/") || name.starts_with("rhasspy/")
}

/// Map an explicit entity source to the entity the engine knows it as.
fn resolve_source(source: &str) -> String {
    if source == RHASSPY_NUMBER {
        SNIPS_NUMBER.to_string()
    } else {
        normalize_entity_name(source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UtteranceChunk {
    Text(String),
    Slot { slot_name: String, entity: String },
}

/// One phrasing of an intent, with slot placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Utterance {
    pub chunks: Vec<UtteranceChunk>,
}

impl Utterance {
    pub fn new(chunks: Vec<UtteranceChunk>) -> Self {
        Self { chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn slot_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, UtteranceChunk::Slot { .. }))
            .count()
    }

    /// Parse the placeholder form (`turn on the [name:name] light`).
    pub fn parse(text: &str) -> Self {
        let chunks = text
            .split_whitespace()
            .map(|token| {
                token
                    .strip_prefix('[')
                    .and_then(|t| t.strip_suffix(']'))
                    .and_then(|t| t.split_once(':'))
                    .filter(|(slot, entity)| !slot.is_empty() && !entity.is_empty())
                    .map(|(slot, entity)| UtteranceChunk::Slot {
                        slot_name: slot.to_string(),
                        entity: entity.to_string(),
                    })
                    .unwrap_or_else(|| UtteranceChunk::Text(token.to_string()))
            })
            .collect();
        Self { chunks }
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match chunk {
                UtteranceChunk::Text(text) => f.write_str(text)?,
                UtteranceChunk::Slot { slot_name, entity } => {
                    write!(f, "[{slot_name}:{entity}]")?
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentUtterances {
    pub name: String,
    pub utterances: Vec<Utterance>,
}

/// Training corpus: intents in graph order plus custom entity values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub intents: Vec<IntentUtterances>,
    pub entities: BTreeMap<String, BTreeSet<String>>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.intents.iter().all(|i| i.utterances.is_empty())
    }

    pub fn intent(&self, name: &str) -> Option<&IntentUtterances> {
        self.intents.iter().find(|i| i.name == name)
    }

    pub fn intent_names(&self) -> Vec<&str> {
        self.intents.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn utterance_count(&self) -> usize {
        self.intents.iter().map(|i| i.utterances.len()).sum()
    }

    /// Compile a graph with no pre-seeded entity values.
    pub fn compile(graph: &SentenceGraph) -> NluResult<Self> {
        Self::compile_with_entities(graph, &BTreeMap::new())
    }

    /// Compile a graph, starting the entity table from `seed` (slot lists).
    pub fn compile_with_entities(
        graph: &SentenceGraph,
        seed: &BTreeMap<String, BTreeSet<String>>,
    ) -> NluResult<Self> {
        let (start, end) = match (graph.start_node(), graph.end_node()) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(NluError::Configuration(
                    "Missing start/end node(s)".into(),
                ))
            }
        };
        graph.check_acyclic()?;

        let mut entities: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, values) in seed {
            let name = normalize_entity_name(name);
            if is_builtin_entity(&name) {
                continue;
            }
            let values: BTreeSet<String> = values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if !values.is_empty() {
                entities.entry(name).or_default().extend(values);
            }
        }

        let mut intents: Vec<IntentUtterances> = Vec::new();
        for root_edge in graph.outgoing_edges(start) {
            let Some(OutputLabel::IntentRoot(intent_name)) = &root_edge.output else {
                continue;
            };

            let mut utterances = Vec::new();
            for path in graph.simple_paths(root_edge.to, end) {
                let utterance = walk_path(graph, &path, &mut entities)?;
                if !utterance.is_empty() {
                    utterances.push(utterance);
                }
            }

            match intents.iter_mut().find(|i| &i.name == intent_name) {
                Some(existing) => existing.utterances.extend(utterances),
                None => intents.push(IntentUtterances {
                    name: intent_name.clone(),
                    utterances,
                }),
            }
        }

        Ok(Self { intents, entities })
    }
}

enum WalkState {
    Idle,
    InSlot {
        slot_name: String,
        captured: Vec<String>,
        source: Option<String>,
    },
}

/// Run the slot state machine along one path.
fn walk_path(
    graph: &SentenceGraph,
    path: &[usize],
    entities: &mut BTreeMap<String, BTreeSet<String>>,
) -> NluResult<Utterance> {
    let mut chunks = Vec::new();
    let mut state = WalkState::Idle;

    for &edge_idx in path {
        let edge = graph.edge(edge_idx);

        match &edge.output {
            Some(OutputLabel::SlotBegin(name)) => {
                if let WalkState::InSlot { slot_name, .. } = &state {
                    return Err(NluError::Configuration(format!(
                        "Slot '{name}' begins inside slot '{slot_name}'"
                    )));
                }
                state = WalkState::InSlot {
                    slot_name: name.clone(),
                    captured: Vec::new(),
                    source: None,
                };
            }
            Some(OutputLabel::EntitySource(name)) => {
                if let WalkState::InSlot { source, .. } = &mut state {
                    *source = Some(name.clone());
                }
            }
            Some(OutputLabel::SlotEnd(name)) => {
                let WalkState::InSlot {
                    slot_name,
                    captured,
                    source,
                } = std::mem::replace(&mut state, WalkState::Idle)
                else {
                    return Err(NluError::Configuration(format!(
                        "Slot '{name}' ends without a matching begin"
                    )));
                };
                if *name != slot_name {
                    return Err(NluError::Configuration(format!(
                        "Slot '{name}' ends inside slot '{slot_name}'"
                    )));
                }

                let entity = match source {
                    // Values for a source come from the seed table only.
                    Some(source) => resolve_source(&source),
                    None => {
                        let entity = normalize_entity_name(&slot_name);
                        let value = captured.join(" ").trim().to_string();
                        if !value.is_empty() {
                            entities.entry(entity.clone()).or_default().insert(value);
                        }
                        entity
                    }
                };

                chunks.push(UtteranceChunk::Slot { slot_name, entity });
            }
            _ => {}
        }

        if let Some(token) = &edge.input {
            match &mut state {
                WalkState::InSlot {
                    captured,
                    source: None,
                    ..
                } => captured.push(token.clone()),
                _ => chunks.push(UtteranceChunk::Text(token.clone())),
            }
        }
    }

    if let WalkState::InSlot { slot_name, .. } = state {
        return Err(NluError::Configuration(format!(
            "Slot '{slot_name}' never ends"
        )));
    }

    Ok(Utterance::new(chunks))
}
