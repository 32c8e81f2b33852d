//! # beacon
//!
//! Command-line host for the analytics pipeline: manages consent, records
//! events and uploads them to a collector.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::Level;

use beacon_core::consent::{ConsentDecision, ConsentPrompt};
use beacon_core::events::AttrValue;
use beacon_pipeline::{load_config, AnalyticsPipeline, CustomEvent, UploadOutcome};
use beacon_store::{Database, SqliteStore};
use beacon_telemetry::{init_telemetry, TelemetryConfig};
use beacon_transport::{HttpTransport, HttpTransportConfig};

/// Analytics pipeline host.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Consent-gated analytics uploader")]
struct Cli {
    /// Pipeline config file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the `SQLite` key-value store.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Collector endpoint batches are POSTed to.
    #[arg(long, env = "BEACON_ENDPOINT", default_value = "http://127.0.0.1:8080/v1/batch")]
    endpoint: String,

    /// Bearer token for the collector.
    #[arg(long, env = "BEACON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Upload request timeout in seconds.
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    /// Log level (RUST_LOG overrides).
    #[arg(long, default_value = "warn")]
    log_level: Level,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Print a metrics snapshot as JSON before exiting.
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or change analytics consent.
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },
    /// Record one event, e.g. `record level_complete level=3 score=1200`.
    Record {
        name: String,
        /// `key=value` attributes. Values parse as bool, integer, float, then string.
        attrs: Vec<String>,
    },
    /// Set a user property attached to every future event.
    Property { key: String, value: String },
    /// Upload anything still queued.
    Flush,
}

#[derive(Subcommand, Debug)]
enum ConsentAction {
    Status,
    Grant,
    Deny,
    /// Forget the stored decision and drop queued events.
    Reset,
    /// Ask on the terminal.
    Ask,
}

impl Cli {
    fn beacon_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".beacon")
    }

    fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| Self::beacon_dir().join("beacon.db"))
    }

    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| Self::beacon_dir().join("pipeline.json"))
    }
}

/// Reads a y/n answer from stdin.
struct TerminalPrompt;

#[async_trait]
impl ConsentPrompt for TerminalPrompt {
    async fn request(&self) -> bool {
        let answer = tokio::task::spawn_blocking(|| {
            eprint!("Share anonymous gameplay analytics? [y/N] ");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

/// `true`/`false`, then integer, then float, else string.
fn parse_attr_value(raw: &str) -> AttrValue {
    if let Ok(b) = raw.parse::<bool>() {
        return AttrValue::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return AttrValue::Int(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => AttrValue::Float(f),
        _ => AttrValue::String(raw.to_string()),
    }
}

fn parse_event(name: &str, attrs: &[String]) -> Result<CustomEvent> {
    let mut event = CustomEvent::new(name);
    for pair in attrs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("attribute `{pair}` is not key=value");
        };
        event = event.with(key, parse_attr_value(value));
    }
    Ok(event)
}

fn report(outcome: Option<UploadOutcome>) {
    match outcome {
        Some(UploadOutcome::Sent { events }) => println!("uploaded {events} event(s)"),
        Some(UploadOutcome::Requeued { events, error, .. }) => {
            println!("upload of {events} event(s) failed: {error}");
        }
        None => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        json: cli.json_logs,
    });

    let config = load_config(&cli.config_path()).context("Failed to load pipeline config")?;

    let db_path = cli.db_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
    let store = Arc::new(SqliteStore::new(db));

    let mut http = HttpTransportConfig::new(&cli.endpoint)
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    if let Some(key) = &cli.api_key {
        http = http.with_api_key(key.clone());
    }
    let transport = Arc::new(HttpTransport::new(http).context("Failed to build transport")?);

    let pipeline = AnalyticsPipeline::builder(store, transport)
        .with_config(config)
        .with_prompt(Arc::new(TerminalPrompt))
        .with_metrics(telemetry.metrics())
        .build()
        .context("Failed to build pipeline")?;

    match &cli.command {
        Command::Consent { action } => match action {
            ConsentAction::Status => {
                println!("consent: {}", pipeline.consent().status().label());
                println!("pipeline: {}", pipeline.state().label());
            }
            ConsentAction::Grant => {
                pipeline.set_consent(ConsentDecision::Granted)?;
                println!("consent granted");
            }
            ConsentAction::Deny => {
                pipeline.set_consent(ConsentDecision::Denied)?;
                println!("consent denied");
            }
            ConsentAction::Reset => {
                pipeline.consent().clear()?;
                pipeline.reset();
                println!("consent reset");
            }
            ConsentAction::Ask => {
                let granted = pipeline.request_consent().await?;
                println!("consent {}", if granted { "granted" } else { "denied" });
            }
        },
        Command::Record { name, attrs } => {
            let event = parse_event(name, attrs)?;
            pipeline.record(&event);
            if pipeline.queue_len() == 0 && !pipeline.uploader().is_in_flight() {
                println!("event not recorded (consent: {})", pipeline.consent().status().label());
            }
        }
        Command::Property { key, value } => {
            pipeline.set_user_property(key, parse_attr_value(value))?;
            println!("property set");
        }
        Command::Flush => {}
    }

    report(pipeline.flush().await);

    if cli.print_metrics {
        let snapshot = pipeline.metrics().snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_values_parse_by_type() {
        assert_eq!(parse_attr_value("true"), AttrValue::Bool(true));
        assert_eq!(parse_attr_value("42"), AttrValue::Int(42));
        assert_eq!(parse_attr_value("2.5"), AttrValue::Float(2.5));
        assert_eq!(parse_attr_value("NaN"), AttrValue::String("NaN".into()));
        assert_eq!(parse_attr_value("gold"), AttrValue::String("gold".into()));
    }

    #[test]
    fn event_attrs_require_equals() {
        assert!(parse_event("tap", &["x=1".into()]).is_ok());
        assert!(parse_event("tap", &["oops".into()]).is_err());
    }

    #[test]
    fn cli_parses_record() {
        let cli = Cli::parse_from(["beacon", "record", "level_complete", "level=3"]);
        match cli.command {
            Command::Record { name, attrs } => {
                assert_eq!(name, "level_complete");
                assert_eq!(attrs, vec!["level=3".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
