use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};

use beacon_core::errors::TransportError;
use beacon_core::events::Event;
use beacon_core::transport::Transport;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("beacon/", env!("CARGO_PKG_VERSION"));

/// Settings for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    /// Whole-request timeout. The pipeline has no timeout of its own.
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct BatchBody<'a> {
    sent_at: DateTime<Utc>,
    events: &'a [Event],
}

/// Uploads batches as a JSON POST.
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Network(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn classify(&self, e: &reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_builder() {
            TransportError::Serialization(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, batch: &[Event]) -> Result<(), TransportError> {
        let body = BatchBody {
            sent_at: Utc::now(),
            events: batch,
        };

        let mut req = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| self.classify(&e))?;
        let status = resp.status();

        if status.is_success() {
            debug!(
                events = batch.len(),
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch accepted"
            );
            return Ok(());
        }

        let hinted = retry_after(resp.headers());
        let text = resp.text().await.unwrap_or_default();
        let mut err = TransportError::from_status(status.as_u16(), text);
        if let TransportError::RateLimited { retry_after } = &mut err {
            *retry_after = hinted;
        }

        warn!(
            events = batch.len(),
            status = status.as_u16(),
            kind = err.error_kind(),
            "batch upload failed"
        );
        Err(err)
    }
}
