use std::time::Duration;

/// Errors a transport can report for one upload attempt.
///
/// The pipeline re-queues on every variant; the classification only feeds
/// logs and metrics.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("batch rejected {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Whether the same batch has a reasonable chance of succeeding later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server_error",
            Self::Rejected { .. } => "rejected",
            Self::Serialization(_) => "serialization",
            Self::Timeout(_) => "timeout",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }

    /// Classify a non-success HTTP status code.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

/// Errors from the key-value persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
