//! Outbound notification delivery.

use async_trait::async_trait;
use core_config::{env_optional, env_parse, env_required, ConfigError, Environment, FromEnv};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::error::{AccountError, AccountResult};

/// Delivers a named notification event.
///
/// `send` echoes the body that was (or would have been) delivered so callers
/// can report it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, event: &str, payload: Value) -> AccountResult<Value>;
}

/// Conversion endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionConfig {
    /// Only optional in dry runs; a live dispatcher without one refuses to send
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Test mode never performs HTTP calls
    pub dry_run: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: 10,
            dry_run: false,
        }
    }
}

impl FromEnv for ConversionConfig {
    /// `CONVERSION_ENDPOINT` (required outside test mode), `CONVERSION_API_KEY`,
    /// `CONVERSION_TIMEOUT_SECS`
    fn from_env() -> Result<Self, ConfigError> {
        let dry_run = Environment::from_env().is_test();
        let endpoint = if dry_run {
            env_optional("CONVERSION_ENDPOINT")
        } else {
            Some(env_required("CONVERSION_ENDPOINT")?)
        };

        Ok(Self {
            endpoint,
            api_key: env_optional("CONVERSION_API_KEY"),
            timeout_secs: env_parse("CONVERSION_TIMEOUT_SECS", 10)?,
            dry_run,
        })
    }
}

/// Body posted for every event: a CDP conversion whose identifier is the
/// event name, with the payload fields merged at the top level.
pub fn conversion_body(event: &str, payload: Value) -> Value {
    let mut body = Map::new();
    body.insert("event_type".into(), Value::from("CONVERSION"));
    body.insert("event_family".into(), Value::from("CDP"));
    body.insert("conversion_identifier".into(), Value::from(event));
    match payload {
        Value::Object(fields) => body.extend(fields),
        Value::Null => {}
        other => {
            body.insert("payload".into(), other);
        }
    }
    Value::Object(body)
}

/// Posts conversion events over HTTP.
pub struct ConversionDispatcher {
    config: ConversionConfig,
    client: Client,
}

impl ConversionDispatcher {
    pub fn new(config: ConversionConfig) -> AccountResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AccountError::dispatch("client", e))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl NotificationDispatcher for ConversionDispatcher {
    #[instrument(skip(self, payload))]
    async fn send(&self, event: &str, payload: Value) -> AccountResult<Value> {
        let body = conversion_body(event, payload);

        if self.config.dry_run {
            debug!(body = %body, "dry run, skipping send");
            return Ok(body);
        }
        // A live dispatcher never reports a send it did not make.
        let Some(endpoint) = self.config.endpoint.as_deref() else {
            return Err(AccountError::dispatch(event, "no conversion endpoint configured"));
        };

        let mut request = self.client.post(endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("api_key", key)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AccountError::dispatch(event, e))?;
        let status = response.status();

        if status.is_success() {
            info!(status = %status, "notification sent");
            Ok(body)
        } else {
            let details = response.text().await.unwrap_or_default();
            error!(status = %status, details = %details, "notification rejected");
            Err(AccountError::dispatch(event, format!("{status}: {details}")))
        }
    }
}

/// Keeps every event in memory instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent.lock().iter().filter(|(e, _)| e == event).count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, event: &str, payload: Value) -> AccountResult<Value> {
        let body = conversion_body(event, payload);
        self.sent.lock().push((event.to_string(), body.clone()));
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversion_body_merges_payload() {
        let body = conversion_body("trial_ended", json!({"clientName": "Acme", "interactionQuota": 3}));
        assert_eq!(
            body,
            json!({
                "event_type": "CONVERSION",
                "event_family": "CDP",
                "conversion_identifier": "trial_ended",
                "clientName": "Acme",
                "interactionQuota": 3
            })
        );
    }

    #[test]
    fn test_conversion_body_wraps_non_objects() {
        let body = conversion_body("x", json!([1, 2]));
        assert_eq!(body["payload"], json!([1, 2]));
        assert!(conversion_body("x", Value::Null).get("payload").is_none());
    }

    #[tokio::test]
    async fn test_dry_run_echoes_without_network() {
        let dispatcher = ConversionDispatcher::new(ConversionConfig {
            endpoint: Some("http://127.0.0.1:9/unreachable".to_string()),
            dry_run: true,
            ..ConversionConfig::default()
        })
        .unwrap();

        let body = dispatcher.send("low_interaction_quota", json!({"a": 1})).await.unwrap();
        assert_eq!(body["conversion_identifier"], "low_interaction_quota");
        assert_eq!(body["a"], 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_dispatch_error() {
        let dispatcher = ConversionDispatcher::new(ConversionConfig {
            endpoint: Some("http://127.0.0.1:9/unreachable".to_string()),
            timeout_secs: 2,
            ..ConversionConfig::default()
        })
        .unwrap();

        let err = dispatcher.send("trial_ended", json!({})).await.unwrap_err();
        assert!(matches!(err, AccountError::Dispatch { ref event, .. } if event == "trial_ended"));
    }

    #[tokio::test]
    async fn test_live_send_without_endpoint_fails() {
        let dispatcher = ConversionDispatcher::new(ConversionConfig::default()).unwrap();

        let err = dispatcher.send("trial_ended", json!({})).await.unwrap_err();
        assert!(matches!(err, AccountError::Dispatch { ref event, .. } if event == "trial_ended"));
    }

    #[test]
    fn test_endpoint_required_outside_test_mode() {
        temp_env::with_vars(
            [
                ("CONVERSION_ENDPOINT", None::<&str>),
                ("TEST_ENV", None),
                ("APP_ENV", Some("production")),
            ],
            || {
                let err = ConversionConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "CONVERSION_ENDPOINT"));
            },
        );
        temp_env::with_vars(
            [
                ("CONVERSION_ENDPOINT", None::<&str>),
                ("TEST_ENV", Some("1")),
            ],
            || {
                let config = ConversionConfig::from_env().unwrap();
                assert!(config.endpoint.is_none());
                assert!(config.dry_run);
            },
        );
    }

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                ("CONVERSION_ENDPOINT", Some("https://cdp.example.com/conversions")),
                ("CONVERSION_API_KEY", Some("k")),
                ("CONVERSION_TIMEOUT_SECS", None),
                ("TEST_ENV", Some("1")),
            ],
            || {
                let config = ConversionConfig::from_env().unwrap();
                assert_eq!(config.endpoint.as_deref(), Some("https://cdp.example.com/conversions"));
                assert_eq!(config.timeout_secs, 10);
                assert!(config.dry_run);
            },
        );
    }

    #[tokio::test]
    async fn test_recording_dispatcher() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.send("trial_ended", json!({"clientName": "A"})).await.unwrap();
        dispatcher.send("trial_ended", json!({"clientName": "B"})).await.unwrap();
        assert_eq!(dispatcher.count("trial_ended"), 2);
        assert_eq!(dispatcher.sent()[1].1["clientName"], "B");
    }
}
