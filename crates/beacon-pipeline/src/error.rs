use beacon_core::errors::StoreError;

use crate::config::ConfigError;

/// Errors raised while building or administering a pipeline.
///
/// Recording never returns one of these; it drops and counts instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no tokio runtime available; build inside a runtime or pass a handle")]
    NoRuntime,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid user property: {0}")]
    InvalidProperty(String),

    #[error("no consent prompt configured")]
    NoConsentPrompt,
}
