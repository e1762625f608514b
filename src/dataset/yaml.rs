//! `---`-delimited YAML rendering of a [`Dataset`].
//!
//! ```yaml
//! ---
//! type: intent
//! name: "SetLight"
//! utterances:
//!   - "turn on the [name:name] light"
//!
//! ---
//! type: entity
//! name: "name"
//! values:
//!   - "kitchen"
//! ```

use std::fmt::Write as _;

use serde::Deserialize;

use crate::error::NluResult;

use super::{Dataset, IntentUtterances, Utterance};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record {
    Intent {
        name: String,
        #[serde(default)]
        utterances: Vec<String>,
    },
    Entity {
        name: String,
        #[serde(default)]
        values: Vec<String>,
    },
}

/// Double-quoted scalar; JSON string escaping is valid YAML.
fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

impl Dataset {
    pub fn to_yaml(&self) -> String {
        let mut out = String::new();

        for intent in &self.intents {
            let _ = writeln!(out, "---\ntype: intent\nname: {}\nutterances:", quote(&intent.name));
            for utterance in &intent.utterances {
                let _ = writeln!(out, "  - {}", quote(&utterance.to_string()));
            }
            out.push('\n');
        }

        for (name, values) in &self.entities {
            let _ = writeln!(out, "---\ntype: entity\nname: {}\nvalues:", quote(name));
            for value in values {
                let _ = writeln!(out, "  - {}", quote(value));
            }
            out.push('\n');
        }

        out
    }

    pub fn from_yaml(text: &str) -> NluResult<Self> {
        let mut dataset = Dataset::default();
        if text.trim().is_empty() {
            return Ok(dataset);
        }

        for document in serde_yaml::Deserializer::from_str(text) {
            match Record::deserialize(document)? {
                Record::Intent { name, utterances } => {
                    let utterances = utterances.iter().map(|u| Utterance::parse(u));
                    match dataset.intents.iter_mut().find(|i| i.name == name) {
                        Some(existing) => existing.utterances.extend(utterances),
                        None => dataset.intents.push(IntentUtterances {
                            name,
                            utterances: utterances.collect(),
                        }),
                    }
                }
                Record::Entity { name, values } => {
                    dataset.entities.entry(name).or_default().extend(values);
                }
            }
        }

        Ok(dataset)
    }
}
