//! # nlu-hermes
//!
//! Hermes-protocol intent recognition service core: turns sentence templates
//! into a training dataset, drives an NLU engine through train/load/parse, and
//! answers `hermes/nlu/query` with correlated result events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use nlu_hermes::engine::TemplateEngineFactory;
//! use nlu_hermes::router::MessageRouter;
//! use nlu_hermes::vfs::MemoryFs;
//! use nlu_hermes::{InboundMessage, NluLogger, Query, ServiceConfig, TrainRequest};
//!
//! # async fn example() -> nlu_hermes::NluResult<()> {
//! let router = MessageRouter::from_config(
//!     ServiceConfig::new("en"),
//!     Arc::new(TemplateEngineFactory),
//!     Arc::new(MemoryFs::new()),
//!     NluLogger::disabled(),
//! )?;
//!
//! let sentences = BTreeMap::from([(
//!     "SetLight".to_string(),
//!     "[SetLight]\nturn (on | off) the (kitchen | bedroom){name} light".to_string(),
//! )]);
//! let train = InboundMessage::Train {
//!     request: TrainRequest::new(sentences),
//!     site_id: "default".into(),
//! };
//! router.route_all(train).await;
//!
//! let replies = router
//!     .route_all(InboundMessage::Query(Query::new("turn on the kitchen light")))
//!     .await;
//! for reply in replies {
//!     println!("{} {}", reply.topic(), reply.to_payload()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Hermes messages: `Query`, `TrainRequest`, result events, topic mapping |
//! | [`graph`] | Sentence graph, simple-path enumeration, template grammar builder |
//! | [`dataset`] | Graph → dataset compiler, YAML dataset format |
//! | [`engine`] | Engine trait, template reference engine, lifecycle manager |
//! | [`snapshot`] | Atomically replaced engine snapshots |
//! | [`recognition`] | Normalization, activation policy, query responses |
//! | [`train`] | Training pipeline: templates → dataset → engine |
//! | [`router`] | Inbound dispatch with streamed responses and activation signals |
//! | [`normalize`] | Casing and number replacement |
//! | [`config`] | `ServiceConfig` (YAML / JSON) |
//! | [`nlulog`] | Injectable structured logging with pluggable sinks |
//! | [`vfs`] | Storage abstraction (native / in-memory) |
//! | [`error`] | Error types with thiserror |

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod graph;
pub mod nlulog;
pub mod normalize;
pub mod recognition;
pub mod router;
pub mod snapshot;
pub mod train;
pub mod types;
pub mod vfs;

pub use config::ServiceConfig;
pub use error::{NluError, NluResult};
pub use nlulog::NluLogger;
pub use types::*;
