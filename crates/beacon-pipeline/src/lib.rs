//! Consent-gated, batching analytics pipeline.
//!
//! Producers call [`AnalyticsPipeline::record`] from any thread. Events pass
//! the consent gate, are normalized into [`beacon_core::Event`]s, buffered in a
//! bounded [`EventQueue`], and shipped in batches by the [`BatchUploader`].

pub mod config;
pub mod consent;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod uploader;

pub use config::{load_config, ConfigError, PipelineConfig};
pub use consent::ConsentStore;
pub use domain::{CustomEvent, DomainEvent, GameEvent};
pub use error::PipelineError;
pub use pipeline::{AnalyticsPipeline, PipelineBuilder, PipelineState};
pub use queue::{EnqueueOutcome, EventQueue, RingBuffer};
pub use uploader::{BatchUploader, DrainTrigger, UploadOutcome};
