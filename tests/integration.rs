use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use nlu_hermes::dataset::Dataset;
use nlu_hermes::engine::{EngineFactory, EngineState, NluEngine, ParseOutcome, TemplateEngineFactory};
use nlu_hermes::error::{NluError, NluResult};
use nlu_hermes::graph::{GraphBuilder, OutputLabel, SentenceGraph, TemplateGrammar};
use nlu_hermes::nlulog::MemorySink;
use nlu_hermes::router::{collect, MessageRouter};
use nlu_hermes::types::*;
use nlu_hermes::vfs::MemoryFs;
use nlu_hermes::{NluLogger, ServiceConfig};

// ─── Scripted engine ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum ParseBehavior {
    Answer,
    Fail,
    Panic,
}

/// Answers every input with the first intent it was trained on, at a fixed
/// confidence. The single slot echoes the same name, so a result mixing two
/// engines would show up as a mismatch.
struct ScriptedEngine {
    language: String,
    confidence: f64,
    fit_delay: Duration,
    behavior: ParseBehavior,
    trained: Option<String>,
}

#[async_trait]
impl NluEngine for ScriptedEngine {
    fn language(&self) -> &str {
        &self.language
    }

    async fn parse(
        &self,
        _text: &str,
        intent_filter: Option<&[String]>,
    ) -> NluResult<ParseOutcome> {
        match self.behavior {
            ParseBehavior::Answer => {}
            ParseBehavior::Fail => {
                return Err(NluError::Other(anyhow::anyhow!("model file truncated")))
            }
            ParseBehavior::Panic => panic!("engine crashed while parsing"),
        }

        let Some(name) = &self.trained else {
            return Ok(ParseOutcome::none());
        };
        if let Some(filter) = intent_filter {
            if !filter.is_empty() && !filter.contains(name) {
                return Ok(ParseOutcome::none());
            }
        }

        let intent = Intent {
            intent_name: name.clone(),
            confidence_score: self.confidence,
        };
        tokio::task::yield_now().await;
        let slot = Slot {
            slot_name: "trained".into(),
            entity: "trained".into(),
            raw_value: name.clone(),
            value: json!({ "kind": "Custom", "value": name }),
            range: SlotRange { start: 0, end: 0 },
        };
        Ok(ParseOutcome {
            intent: Some(intent),
            slots: vec![slot],
        })
    }

    async fn fit(&mut self, dataset: &Dataset) -> NluResult<()> {
        tokio::time::sleep(self.fit_delay).await;
        let first = dataset
            .intents
            .first()
            .ok_or_else(|| NluError::TrainingData("no intents".into()))?;
        self.trained = Some(first.name.clone());
        Ok(())
    }

    fn snapshot(&self) -> NluResult<serde_json::Value> {
        Ok(json!({ "trained": self.trained }))
    }
}

struct ScriptedFactory {
    confidence: f64,
    fit_delay: Duration,
    behavior: ParseBehavior,
}

impl ScriptedFactory {
    fn new(confidence: f64) -> Self {
        Self {
            confidence,
            fit_delay: Duration::ZERO,
            behavior: ParseBehavior::Answer,
        }
    }

    fn with_behavior(mut self, behavior: ParseBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn with_fit_delay(mut self, delay: Duration) -> Self {
        self.fit_delay = delay;
        self
    }

    fn engine(&self, language: &str, trained: Option<String>) -> Box<dyn NluEngine> {
        Box::new(ScriptedEngine {
            language: language.to_string(),
            confidence: self.confidence,
            fit_delay: self.fit_delay,
            behavior: self.behavior,
            trained,
        })
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, language: &str) -> NluResult<Box<dyn NluEngine>> {
        Ok(self.engine(language, None))
    }

    fn restore(
        &self,
        language: &str,
        state: serde_json::Value,
    ) -> NluResult<Box<dyn NluEngine>> {
        let trained = state["trained"].as_str().map(str::to_string);
        Ok(self.engine(language, trained))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn router_with(config: ServiceConfig, factory: Arc<dyn EngineFactory>) -> MessageRouter {
    MessageRouter::from_config(config, factory, Arc::new(MemoryFs::new()), NluLogger::disabled())
        .unwrap()
}

fn train(sentences: &[(&str, &str)]) -> InboundMessage {
    let sentences = sentences
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    InboundMessage::Train {
        request: TrainRequest::new(sentences).with_id("train-1"),
        site_id: "default".into(),
    }
}

fn light_templates() -> &'static str {
    "[SetLight]\nturn (on | off) the (kitchen | bedroom){name} light"
}

fn trained_name(message: &OutboundMessage) -> (String, String) {
    let OutboundMessage::Intent(event) = message else {
        panic!("expected intent event, got {message:?}");
    };
    (
        event.intent.intent_name.clone(),
        event.slots[0].raw_value.clone(),
    )
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn compiled_dataset_for_two_light_paths() {
    let graph = TemplateGrammar::new()
        .build(
            &BTreeMap::from([(
                "SetLight".to_string(),
                "[SetLight]\nturn on the (kitchen | bedroom){name} light\nturn off the (kitchen | bedroom){name} light".to_string(),
            )]),
            &BTreeMap::new(),
        )
        .unwrap();
    let dataset = Dataset::compile(&graph).unwrap();

    assert_eq!(dataset.intent_names(), vec!["SetLight"]);
    let utterances: BTreeSet<String> = dataset.intents[0]
        .utterances
        .iter()
        .map(|u| u.to_string())
        .collect();
    assert_eq!(
        utterances,
        BTreeSet::from([
            "turn on the [name:name] light".to_string(),
            "turn off the [name:name] light".to_string(),
        ])
    );
    assert_eq!(
        dataset.entities["name"],
        BTreeSet::from(["kitchen".to_string(), "bedroom".to_string()])
    );
}

#[tokio::test]
async fn train_then_parse_light_query() {
    let router = router_with(ServiceConfig::new("en"), Arc::new(TemplateEngineFactory));
    let trained = router.route_all(train(&[("SetLight", light_templates())])).await;
    assert_eq!(trained[0].topic(), "rhasspy/nlu/default/trainSuccess");

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("turn on the kitchen light").with_id("q1"),
        ))
        .await;
    assert_eq!(replies.len(), 2);

    let OutboundMessage::Parsed(parsed) = &replies[0] else {
        panic!("expected parsed event");
    };
    assert_eq!(parsed.intent.intent_name, "SetLight");
    assert_eq!(parsed.id.as_deref(), Some("q1"));
    assert_eq!(parsed.slots.len(), 1);
    assert_eq!(parsed.slots[0].slot_name, "name");
    assert_eq!(parsed.slots[0].raw_value, "kitchen");
    assert_eq!(replies[1].topic(), "hermes/intent/SetLight");
}

#[tokio::test]
async fn query_before_training_is_engine_not_ready() {
    let config = ServiceConfig::new("en").with_engine_path("snips/engine.json");
    let router = router_with(config, Arc::new(TemplateEngineFactory));

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("turn on the light").with_session("s1"),
        ))
        .await;
    assert_eq!(replies.len(), 1);
    let OutboundMessage::Error(event) = &replies[0] else {
        panic!("expected error event");
    };
    assert_eq!(event.kind, "engine_not_ready");
    assert_eq!(event.context, "turn on the light");
    assert_eq!(event.session_id.as_deref(), Some("s1"));
    assert_eq!(router.engines().state().await, EngineState::Unloaded);
}

#[tokio::test]
async fn low_confidence_implicit_query_not_recognized() {
    let router = router_with(ServiceConfig::new("en"), Arc::new(ScriptedFactory::new(0.75)));
    let mut activations = router.activations().unwrap();
    router.route_all(train(&[("SetLight", light_templates())])).await;

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("turn on the light").implicit(),
        ))
        .await;
    assert_eq!(
        replies,
        vec![OutboundMessage::NotRecognized(NotRecognizedEvent {
            input: "turn on the light".into(),
            implicit: true,
            id: None,
            site_id: "default".into(),
            session_id: None,
        })]
    );
    assert!(activations.try_recv().is_err());
}

#[tokio::test]
async fn empty_training_keeps_previous_engine() {
    let router = router_with(ServiceConfig::new("en"), Arc::new(TemplateEngineFactory));
    router.route_all(train(&[("SetLight", light_templates())])).await;
    let before = router.engines().active().await.unwrap();

    let replies = router.route_all(train(&[])).await;
    assert_eq!(replies.len(), 1);
    let OutboundMessage::Error(event) = &replies[0] else {
        panic!("expected error event");
    };
    assert_eq!(event.kind, "training_data");
    assert_eq!(event.session_id.as_deref(), Some("train-1"));

    let after = router.engines().active().await.unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    let replies = router
        .route_all(InboundMessage::Query(Query::new("turn off the bedroom light")))
        .await;
    assert_eq!(replies[1].topic(), "hermes/intent/SetLight");
}

#[tokio::test]
async fn failing_engine_reports_runtime_parse_with_raw_input() {
    let mut config = ServiceConfig::new("en");
    config.replace_numbers = true;
    let factory = ScriptedFactory::new(1.0).with_behavior(ParseBehavior::Fail);
    let router = router_with(config, Arc::new(factory));
    router.route_all(train(&[("Dim", "[Dim]\ndim to fifty")])).await;

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("dim to 50").with_site("office").with_session("s7"),
        ))
        .await;
    assert_eq!(replies.len(), 1);
    let OutboundMessage::Error(event) = &replies[0] else {
        panic!("expected error event");
    };
    assert_eq!(event.kind, "runtime_parse");
    assert_eq!(event.context, "dim to 50");
    assert!(event.error.contains("model file truncated"));
    assert_eq!(event.site_id, "office");
    assert_eq!(event.session_id.as_deref(), Some("s7"));
}

#[tokio::test]
async fn panicking_engine_still_answers_once() {
    let factory = ScriptedFactory::new(1.0).with_behavior(ParseBehavior::Panic);
    let router = router_with(ServiceConfig::new("en"), Arc::new(factory));
    router.route_all(train(&[("Wake", "[Wake]\nhey there")])).await;

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("hey there").with_session("s8"),
        ))
        .await;
    assert_eq!(replies.len(), 1);
    let OutboundMessage::Error(event) = &replies[0] else {
        panic!("expected error event");
    };
    assert_eq!(event.kind, "runtime_parse");
    assert_eq!(event.context, "hey there");
    assert_eq!(event.session_id.as_deref(), Some("s8"));

    let replies = router
        .route_all(InboundMessage::Query(Query::new("hey there")))
        .await;
    assert_eq!(replies.len(), 1, "router keeps serving after a crash");
}

#[tokio::test]
async fn oversized_spoken_number_is_not_recognized() {
    let router = router_with(ServiceConfig::new("en"), Arc::new(TemplateEngineFactory));
    router
        .route_all(train(&[("Dim", "[Dim]\ndim to $rhasspy/number{level} percent")]))
        .await;

    let text = format!("dim to {}percent", "hundred ".repeat(10));
    let replies = router
        .route_all(InboundMessage::Query(Query::new(text)))
        .await;
    assert!(matches!(replies[..], [OutboundMessage::NotRecognized(_)]));

    let replies = router
        .route_all(InboundMessage::Query(Query::new("dim to forty percent")))
        .await;
    assert_eq!(replies.len(), 2);
}

// ─── Properties ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn implicit_threshold_is_strict() {
    for (confidence, recognized) in [(0.80, false), (0.81, true)] {
        let router = router_with(
            ServiceConfig::new("en"),
            Arc::new(ScriptedFactory::new(confidence)),
        );
        let mut activations = router.activations().unwrap();
        router.route_all(train(&[("Wake", "[Wake]\nhey there")])).await;

        let replies = router
            .route_all(InboundMessage::Query(
                Query::new("hey there").implicit().with_site("office"),
            ))
            .await;

        let mut signals = Vec::new();
        while let Ok(signal) = activations.try_recv() {
            signals.push(signal);
        }

        if recognized {
            assert_eq!(replies.len(), 2, "confidence {confidence}");
            assert_eq!(signals.len(), 1);
            assert_eq!(signals[0].intent_name, "Wake");
            assert_eq!(signals[0].site_id, "office");
        } else {
            assert!(
                matches!(replies[..], [OutboundMessage::NotRecognized(_)]),
                "confidence {confidence}"
            );
            assert!(signals.is_empty());
        }
    }
}

#[tokio::test]
async fn explicit_queries_ignore_threshold() {
    let router = router_with(ServiceConfig::new("en"), Arc::new(ScriptedFactory::new(0.2)));
    let mut activations = router.activations().unwrap();
    router.route_all(train(&[("Wake", "[Wake]\nhey there")])).await;

    let replies = router
        .route_all(InboundMessage::Query(Query::new("hey there")))
        .await;
    assert_eq!(replies.len(), 2);
    let OutboundMessage::Parsed(parsed) = &replies[0] else {
        panic!("expected parsed event");
    };
    assert_eq!(parsed.intent.confidence_score, 0.2);
    assert!(activations.try_recv().is_err());
}

#[tokio::test]
async fn queries_during_training_see_one_engine() {
    let factory = ScriptedFactory::new(1.0).with_fit_delay(Duration::from_millis(30));
    let router = router_with(ServiceConfig::new("en"), Arc::new(factory));
    router.route_all(train(&[("Old", "[Old]\nhello")])).await;

    let training = router.route(train(&[("New", "[New]\nhello")]));
    let mut pending = Vec::new();
    for _ in 0..20 {
        pending.push(router.route(InboundMessage::Query(Query::new("hello"))));
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let mut seen = BTreeSet::new();
    for rx in pending {
        let replies = collect(rx).await;
        let (intent, slot) = trained_name(&replies[1]);
        assert_eq!(intent, slot);
        seen.insert(intent);
    }
    assert!(seen.iter().all(|n| n == "Old" || n == "New"));

    let trained = collect(training).await;
    assert!(matches!(trained[0], OutboundMessage::TrainSuccess { .. }));

    let replies = router
        .route_all(InboundMessage::Query(Query::new("hello")))
        .await;
    assert_eq!(trained_name(&replies[1]), ("New".into(), "New".into()));
}

#[test]
fn compiled_utterances_match_enumerated_paths() {
    // start -(label A)-> r -(hi)-> a -(there | ε)-> end
    let mut graph = SentenceGraph::new();
    let start = graph.add_node();
    let root = graph.add_node();
    let a = graph.add_node();
    let end = graph.add_node();
    graph.set_start(start);
    graph.set_end(end);
    graph.add_edge(start, root, None, Some(OutputLabel::IntentRoot("A".into())));
    graph.add_edge(root, a, Some("hi"), None);
    graph.add_edge(a, end, Some("there"), None);
    graph.add_edge(a, end, None, None);

    let enumerated: BTreeSet<String> = graph
        .simple_paths(root, end)
        .iter()
        .map(|path| {
            path.iter()
                .filter_map(|&idx| graph.edge(idx).input.clone())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();

    let dataset = Dataset::compile(&graph).unwrap();
    let compiled: BTreeSet<String> = dataset.intents[0]
        .utterances
        .iter()
        .map(|u| u.to_string())
        .collect();
    assert_eq!(compiled, enumerated);
    assert_eq!(
        compiled,
        BTreeSet::from(["hi".to_string(), "hi there".to_string()])
    );
}

#[test]
fn cyclic_graph_is_rejected() {
    let mut graph = SentenceGraph::new();
    graph.set_start(0);
    graph.set_end(3);
    graph.add_edge(0, 1, None, Some(OutputLabel::IntentRoot("Loop".into())));
    graph.add_edge(1, 2, Some("again"), None);
    graph.add_edge(2, 1, Some("and"), None);
    graph.add_edge(2, 3, None, None);

    let err = Dataset::compile(&graph).unwrap_err();
    assert!(matches!(err, NluError::Configuration(_)));
}

// ─── Slot lists and numbers ─────────────────────────────────────────────────

#[tokio::test]
async fn slot_lists_and_numbers_end_to_end() {
    let mut config = ServiceConfig::new("en");
    config.replace_numbers = true;
    config.casing = nlu_hermes::normalize::Casing::Lower;
    let router = router_with(config, Arc::new(TemplateEngineFactory));

    let request = TrainRequest::new(BTreeMap::from([(
        "lights.ini".to_string(),
        "[SetColor]\nmake the $room{room} light $color{color}\n\n[Dim]\ndim to $rhasspy/number{level}".to_string(),
    )]))
    .with_slots(BTreeMap::from([
        (
            "room".to_string(),
            BTreeSet::from(["kitchen".to_string(), "living room".to_string()]),
        ),
        (
            "$color".to_string(),
            BTreeSet::from(["red".to_string(), " blue ".to_string()]),
        ),
    ]));
    let trained = router
        .route_all(InboundMessage::Train {
            request,
            site_id: "default".into(),
        })
        .await;
    assert!(matches!(trained[0], OutboundMessage::TrainSuccess { .. }));

    let replies = router
        .route_all(InboundMessage::Query(Query::new(
            "Make the Living Room light blue",
        )))
        .await;
    let OutboundMessage::Intent(event) = &replies[1] else {
        panic!("expected intent event");
    };
    assert_eq!(event.intent.intent_name, "SetColor");
    let values: Vec<&str> = event.slots.iter().map(|s| s.raw_value.as_str()).collect();
    assert_eq!(values, vec!["living room", "blue"]);

    let replies = router
        .route_all(InboundMessage::Query(Query::new("dim to 40")))
        .await;
    let OutboundMessage::Intent(event) = &replies[1] else {
        panic!("expected intent event");
    };
    assert_eq!(event.intent.intent_name, "Dim");
    assert_eq!(event.raw_input, "dim to 40");
    assert_eq!(event.input, "dim to forty");
    assert_eq!(event.slots[0].entity, "snips/number");
    assert_eq!(event.slots[0].value["value"], 40.0);
}

#[tokio::test]
async fn intent_filter_restricts_candidates() {
    let router = router_with(ServiceConfig::new("en"), Arc::new(TemplateEngineFactory));
    router
        .route_all(train(&[
            ("GetTime", "[GetTime]\nwhat time is it"),
            ("GetDate", "[GetDate]\nwhat day is it"),
        ]))
        .await;

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("what time is it").with_intent_filter(vec!["GetDate".into()]),
        ))
        .await;
    assert!(matches!(replies[..], [OutboundMessage::NotRecognized(_)]));

    let replies = router
        .route_all(InboundMessage::Query(
            Query::new("what time is it").with_intent_filter(vec![]),
        ))
        .await;
    assert_eq!(replies[1].topic(), "hermes/intent/GetTime");
}

// ─── Bus topics and storage ─────────────────────────────────────────────────

#[tokio::test]
async fn raw_topics_round_trip_through_router() {
    let sink = Arc::new(MemorySink::new());
    let router = MessageRouter::from_config(
        ServiceConfig::new("en"),
        Arc::new(TemplateEngineFactory),
        Arc::new(MemoryFs::new()),
        Arc::new(NluLogger::new().with_sink(sink.clone())),
    )
    .unwrap();

    let payload = json!({
        "id": "t-9",
        "sentences": { "intents.ini": "[GetTime]\nwhat time is it" },
        "slots": {},
    })
    .to_string();
    let replies = collect(router.route_topic("rhasspy/nlu/default/train", &payload)).await;
    assert_eq!(replies[0].topic(), "rhasspy/nlu/default/trainSuccess");
    assert_eq!(replies[0].to_payload().unwrap(), r#"{"id":"t-9"}"#);

    let payload = json!({
        "input": "what time is it",
        "siteId": "default",
        "sessionId": "s-1",
        "id": "q-1",
    })
    .to_string();
    let replies = collect(router.route_topic(QUERY_TOPIC, &payload)).await;
    assert_eq!(replies[0].topic(), INTENT_PARSED_TOPIC);
    let body: serde_json::Value = serde_json::from_str(&replies[1].to_payload().unwrap()).unwrap();
    assert_eq!(body["intent"]["intentName"], "GetTime");
    assert_eq!(body["sessionId"], "s-1");
    assert_eq!(body["rawInput"], "what time is it");

    let replies = collect(router.route_topic("hermes/audioServer/default/playBytes", "")).await;
    assert!(replies.is_empty());
    assert!(sink.contains("router", "playBytes"));
}

#[cfg(feature = "native")]
#[tokio::test]
async fn native_snapshot_survives_restart() {
    use nlu_hermes::vfs::NativeFs;

    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::from_yaml(
        "language: en\nengine_path: snips/engine.json\ndataset_path: snips/dataset.yaml\n",
    )
    .unwrap();

    let router = MessageRouter::from_config(
        config.clone(),
        Arc::new(TemplateEngineFactory),
        Arc::new(NativeFs::new(dir.path())),
        NluLogger::disabled(),
    )
    .unwrap();
    router.route_all(train(&[("SetLight", light_templates())])).await;

    assert!(dir.path().join("snips/engine.json").exists());
    assert!(!dir.path().join("snips/engine.json.tmp").exists());
    let yaml = std::fs::read_to_string(dir.path().join("snips/dataset.yaml")).unwrap();
    let dataset = Dataset::from_yaml(&yaml).unwrap();
    assert_eq!(dataset.utterance_count(), 2);

    let restarted = MessageRouter::from_config(
        config,
        Arc::new(TemplateEngineFactory),
        Arc::new(NativeFs::new(dir.path())),
        NluLogger::disabled(),
    )
    .unwrap();
    let replies = restarted
        .route_all(InboundMessage::Query(Query::new("turn off the bedroom light")))
        .await;
    assert_eq!(replies[1].topic(), "hermes/intent/SetLight");
}
