use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{NluError, NluResult};

// ─── Topics ─────────────────────────────────────────────────────────────────

pub const QUERY_TOPIC: &str = "hermes/nlu/query";
pub const INTENT_PARSED_TOPIC: &str = "hermes/nlu/intentParsed";
pub const NOT_RECOGNIZED_TOPIC: &str = "hermes/nlu/intentNotRecognized";
pub const ERROR_TOPIC: &str = "hermes/error/nlu";

const TRAIN_TOPIC_PREFIX: &str = "rhasspy/nlu/";
const TRAIN_TOPIC_SUFFIX: &str = "/train";

fn default_site_id() -> String {
    "default".to_string()
}

// ─── Inbound ────────────────────────────────────────────────────────────────

/// Recognition request (`hermes/nlu/query`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_filter: Option<Vec<String>>,
    #[serde(default = "default_site_id")]
    pub site_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub wakeword_id: Option<String>,
    /// Set for queries that were not explicitly addressed to the assistant.
    #[serde(default)]
    pub implicit: bool,
}

impl Query {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            intent_filter: None,
            site_id: default_site_id(),
            session_id: None,
            id: None,
            wakeword_id: None,
            implicit: false,
        }
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_intent_filter(mut self, intents: Vec<String>) -> Self {
        self.intent_filter = Some(intents);
        self
    }

    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }
}

/// Training request (`rhasspy/nlu/<siteId>/train`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    /// Sentence template block per intent (or one ini block per file).
    #[serde(rename = "sentences", alias = "sentencesByIntent", default)]
    pub sentences_by_intent: BTreeMap<String, String>,
    /// Slot lists referenced from templates as `$name`.
    #[serde(rename = "slots", alias = "slotsByName", default)]
    pub slots_by_name: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub id: Option<String>,
}

impl TrainRequest {
    pub fn new(sentences_by_intent: BTreeMap<String, String>) -> Self {
        Self {
            sentences_by_intent,
            slots_by_name: BTreeMap::new(),
            id: None,
        }
    }

    pub fn with_slots(mut self, slots_by_name: BTreeMap<String, BTreeSet<String>>) -> Self {
        self.slots_by_name = slots_by_name;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Message kinds the router knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Query,
    Train,
    Unknown,
}

/// Closed set of inbound messages.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Query(Query),
    /// Train requests carry their site only in the topic.
    Train {
        request: TrainRequest,
        site_id: String,
    },
    Unknown {
        topic: String,
    },
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Query(_) => MessageKind::Query,
            InboundMessage::Train { .. } => MessageKind::Train,
            InboundMessage::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// Decode a bus message from its topic and JSON payload.
    pub fn from_topic(topic: &str, payload: &str) -> NluResult<Self> {
        if topic == QUERY_TOPIC {
            return Ok(InboundMessage::Query(serde_json::from_str(payload)?));
        }

        if let Some(site_id) = train_topic_site(topic) {
            return Ok(InboundMessage::Train {
                request: serde_json::from_str(payload)?,
                site_id: site_id.to_string(),
            });
        }

        Ok(InboundMessage::Unknown {
            topic: topic.to_string(),
        })
    }
}

fn train_topic_site(topic: &str) -> Option<&str> {
    let site = topic
        .strip_prefix(TRAIN_TOPIC_PREFIX)?
        .strip_suffix(TRAIN_TOPIC_SUFFIX)?;
    if site.is_empty() || site.contains('/') {
        None
    } else {
        Some(site)
    }
}

// ─── Results ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub intent_name: String,
    pub confidence_score: f64,
}

/// Character offsets of a slot in the parsed text (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub slot_name: String,
    pub entity: String,
    /// Text exactly as it appeared in the input.
    pub raw_value: String,
    /// Engine-normalized value, e.g. `{"kind": "Number", "value": 75}`.
    pub value: serde_json::Value,
    pub range: SlotRange,
}

/// Outcome of a successful recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub intent_name: String,
    pub confidence: f64,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrToken {
    pub value: String,
    pub confidence: f64,
    pub range_start: usize,
    pub range_end: usize,
}

impl AsrToken {
    /// Whitespace tokens with offsets assuming single-space separation.
    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Vec<AsrToken> {
        let mut start = 0;
        words
            .into_iter()
            .map(|word| {
                let len = word.chars().count();
                let token = AsrToken {
                    value: word.to_string(),
                    confidence: 1.0,
                    range_start: start,
                    range_end: start + len,
                };
                start += len + 1;
                token
            })
            .collect()
    }
}

// ─── Outbound ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEvent {
    pub input: String,
    pub id: Option<String>,
    pub site_id: String,
    pub session_id: Option<String>,
    pub intent: Intent,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEvent {
    pub input: String,
    pub id: Option<String>,
    pub site_id: String,
    pub session_id: Option<String>,
    pub intent: Intent,
    pub slots: Vec<Slot>,
    pub asr_tokens: Vec<Vec<AsrToken>>,
    /// Query input before number replacement and casing.
    pub raw_input: String,
    pub wakeword_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotRecognizedEvent {
    pub input: String,
    pub implicit: bool,
    pub id: Option<String>,
    pub site_id: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub site_id: String,
    pub session_id: Option<String>,
    pub error: String,
    pub context: String,
    /// Short code from [`NluError::kind`].
    #[serde(default)]
    pub kind: String,
}

impl ErrorEvent {
    pub fn from_error(
        err: &NluError,
        site_id: impl Into<String>,
        session_id: Option<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            session_id,
            error: err.to_string(),
            context: context.into(),
            kind: err.kind().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSuccessEvent {
    pub id: Option<String>,
}

/// Raised for implicit queries that cleared the confidence threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSignal {
    pub intent_name: String,
    pub confidence: f64,
    pub id: Option<String>,
    pub site_id: String,
    pub session_id: Option<String>,
}

/// Closed set of outbound messages.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Parsed(ParsedEvent),
    Intent(IntentEvent),
    NotRecognized(NotRecognizedEvent),
    Error(ErrorEvent),
    TrainSuccess {
        event: TrainSuccessEvent,
        site_id: String,
    },
}

impl OutboundMessage {
    /// Publish topic for this message.
    pub fn topic(&self) -> String {
        match self {
            OutboundMessage::Parsed(_) => INTENT_PARSED_TOPIC.to_string(),
            OutboundMessage::Intent(event) => format!("hermes/intent/{}", event.intent.intent_name),
            OutboundMessage::NotRecognized(_) => NOT_RECOGNIZED_TOPIC.to_string(),
            OutboundMessage::Error(_) => ERROR_TOPIC.to_string(),
            OutboundMessage::TrainSuccess { site_id, .. } => {
                format!("{TRAIN_TOPIC_PREFIX}{site_id}/trainSuccess")
            }
        }
    }

    /// JSON payload for publishing.
    pub fn to_payload(&self) -> NluResult<String> {
        let json = match self {
            OutboundMessage::Parsed(e) => serde_json::to_string(e)?,
            OutboundMessage::Intent(e) => serde_json::to_string(e)?,
            OutboundMessage::NotRecognized(e) => serde_json::to_string(e)?,
            OutboundMessage::Error(e) => serde_json::to_string(e)?,
            OutboundMessage::TrainSuccess { event, .. } => serde_json::to_string(event)?,
        };
        Ok(json)
    }

    /// Site this message is addressed to.
    pub fn site_id(&self) -> &str {
        match self {
            OutboundMessage::Parsed(e) => &e.site_id,
            OutboundMessage::Intent(e) => &e.site_id,
            OutboundMessage::NotRecognized(e) => &e.site_id,
            OutboundMessage::Error(e) => &e.site_id,
            OutboundMessage::TrainSuccess { site_id, .. } => site_id,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            OutboundMessage::Parsed(e) => e.session_id.as_deref(),
            OutboundMessage::Intent(e) => e.session_id.as_deref(),
            OutboundMessage::NotRecognized(e) => e.session_id.as_deref(),
            OutboundMessage::Error(e) => e.session_id.as_deref(),
            OutboundMessage::TrainSuccess { .. } => None,
        }
    }
}
