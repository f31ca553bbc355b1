use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_error_state() -> String {
    "ERROR".to_string()
}

fn default_message_keeper_size() -> usize {
    10
}

/// Adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Exit state put in results of failed messages
    #[serde(default = "default_error_state")]
    pub error_state: String,
    /// Number of operational notices kept
    #[serde(default = "default_message_keeper_size")]
    pub message_keeper_size: usize,
    /// Upper bound on the shutdown drain wait; unbounded when absent
    #[serde(default)]
    pub drain_timeout_ms: Option<u64>,
    /// Log the payload before each stage call
    #[serde(default)]
    pub log_intermediary_results: bool,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            error_state: default_error_state(),
            message_keeper_size: default_message_keeper_size(),
            drain_timeout_ms: None,
            log_intermediary_results: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::Invalid(format!("adapter configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid("adapter name must not be empty".into()));
        }
        if self.error_state.is_empty() {
            return Err(ConfigurationError::Invalid("error state must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_error_state(mut self, state: impl Into<String>) -> Self {
        self.error_state = state.into();
        self
    }

    pub fn with_message_keeper_size(mut self, size: usize) -> Self {
        self.message_keeper_size = size;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_log_intermediary_results(mut self, enable: bool) -> Self {
        self.log_intermediary_results = enable;
        self
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config = AdapterConfig::from_json(r#"{"name": "orders"}"#).unwrap();
        assert_eq!(config, AdapterConfig::new("orders"));
        assert_eq!(config.error_state, "ERROR");
        assert_eq!(config.message_keeper_size, 10);
        assert!(config.drain_timeout().is_none());
    }

    #[test]
    fn test_full_json() {
        let config = AdapterConfig::from_json(
            r#"{
                "name": "orders",
                "description": "order intake",
                "error_state": "FAILED",
                "message_keeper_size": 3,
                "drain_timeout_ms": 1500,
                "log_intermediary_results": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.error_state, "FAILED");
        assert_eq!(config.drain_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.log_intermediary_results);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            AdapterConfig::from_json(r#"{"name": ""}"#),
            Err(ConfigurationError::Invalid(_))
        ));
        assert!(AdapterConfig::from_json(r#"{"name": "a", "bogus": 1}"#).is_err());
    }
}
