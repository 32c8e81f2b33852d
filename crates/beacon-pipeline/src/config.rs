//! Pipeline configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`PipelineConfig::default()`]
//! 2. If the JSON file exists, deep-merge its values over the defaults
//! 3. Apply `BEACON_*` environment overrides
//! 4. Validate
//!
//! The result is read once when the pipeline is built.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 10;

const MAX_QUEUE_CAPACITY: usize = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Host-level analytics switch. Consent is still required on top of it.
    pub analytics_enabled: bool,
    /// Queue capacity `C`. Oldest events are evicted past this.
    pub queue_capacity: usize,
    /// Batch size `B`. Reaching it triggers an upload.
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analytics_enabled: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batchSize must be at least 1".into()));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidValue(format!(
                "queueCapacity {} exceeds {MAX_QUEUE_CAPACITY}",
                self.queue_capacity
            )));
        }
        if self.batch_size > self.queue_capacity {
            return Err(ConfigError::InvalidValue(format!(
                "batchSize {} exceeds queueCapacity {}",
                self.batch_size, self.queue_capacity
            )));
        }
        Ok(())
    }
}

/// Load configuration from `path` (missing file means defaults), then apply
/// environment overrides and validate.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let defaults = serde_json::to_value(PipelineConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading pipeline config from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "pipeline config file not found, using defaults");
        defaults
    };

    let mut config: PipelineConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

/// Objects merge per key, everything else is replaced, nulls are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `BEACON_*` overrides. Invalid values are logged and ignored.
///
/// `lookup` is `std::env::var` in production; tests pass a closure.
pub fn apply_env_overrides<F>(config: &mut PipelineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = read_bool(&lookup, "BEACON_ANALYTICS_ENABLED") {
        config.analytics_enabled = v;
    }
    if let Some(v) = read_usize(&lookup, "BEACON_QUEUE_CAPACITY", 1, MAX_QUEUE_CAPACITY) {
        config.queue_capacity = v;
    }
    if let Some(v) = read_usize(&lookup, "BEACON_BATCH_SIZE", 1, MAX_QUEUE_CAPACITY) {
        config.batch_size = v;
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_bool<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<bool> {
    let val = lookup(name).filter(|v| !v.is_empty())?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_usize<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    name: &str,
    min: usize,
    max: usize,
) -> Option<usize> {
    let val = lookup(name).filter(|v| !v.is_empty())?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn temp_config(contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("beacon-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pipeline.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert!(config.analytics_enabled);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.batch_size, 10);
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/beacon/pipeline.json")).unwrap();
        assert_eq!(config.queue_capacity, PipelineConfig::default().queue_capacity);
    }

    #[test]
    fn partial_file_overrides() {
        let path = temp_config(r#"{"batchSize": 4}"#);
        let config = load_config(&path).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.queue_capacity, 100);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn null_in_file_keeps_default() {
        let path = temp_config(r#"{"analyticsEnabled": null, "queueCapacity": 50}"#);
        let config = load_config(&path).unwrap();
        assert!(config.analytics_enabled);
        assert_eq!(config.queue_capacity, 50);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn invalid_json_is_error() {
        let path = temp_config("not json");
        assert!(matches!(load_config(&path), Err(ConfigError::Json(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn batch_larger_than_capacity_rejected() {
        let path = temp_config(r#"{"queueCapacity": 5, "batchSize": 6}"#);
        assert!(matches!(load_config(&path), Err(ConfigError::InvalidValue(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn zero_batch_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = PipelineConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("BEACON_ANALYTICS_ENABLED", "off"),
                ("BEACON_QUEUE_CAPACITY", "250"),
                ("BEACON_BATCH_SIZE", "25"),
            ]),
        );
        assert!(!config.analytics_enabled);
        assert_eq!(config.queue_capacity, 250);
        assert_eq!(config.batch_size, 25);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut config = PipelineConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("BEACON_ANALYTICS_ENABLED", "maybe"),
                ("BEACON_QUEUE_CAPACITY", "0"),
                ("BEACON_BATCH_SIZE", "ten"),
            ]),
        );
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_usize_range("10", 1, 10), Some(10));
        assert_eq!(parse_usize_range("11", 1, 10), None);
        assert_eq!(parse_usize_range("-1", 1, 10), None);
    }

    #[test]
    fn deep_merge_nested() {
        let merged = deep_merge(
            serde_json::json!({"a": {"b": 1, "c": 2}}),
            serde_json::json!({"a": {"b": 9}}),
        );
        assert_eq!(merged, serde_json::json!({"a": {"b": 9, "c": 2}}));
    }
}
