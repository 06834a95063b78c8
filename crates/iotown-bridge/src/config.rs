// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Supports both programmatic and file-based configuration. Values coming
//! from the environment (see `main.rs`) are layered on top of the file.

use crate::queue::{DeliveryOptions, Qos};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid mapping JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge name (for identification).
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// ChirpStack (source) broker.
    #[serde(default = "BrokerConfig::chirpstack")]
    pub source: BrokerConfig,

    /// IOTOWN (destination) broker.
    #[serde(default = "BrokerConfig::iotown")]
    pub destination: BrokerConfig,

    /// Source topic patterns to subscribe to.
    #[serde(default = "default_subscribe_topics")]
    pub subscribe_topics: Vec<String>,

    /// Group mappings used to build destination topics.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Prefix for generated MQTT client IDs.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Delay between reconnect attempts (milliseconds).
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Upper bound for handing one payload to the destination client (milliseconds).
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,

    /// Log a running total every N bridged messages (0 to disable).
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bridge_name() -> String {
    "iotown-bridge".to_string()
}

fn default_subscribe_topics() -> Vec<String> {
    vec![
        "application/+/device/+/event/up".to_string(),
        "+/gateway/+/event/stats".to_string(),
    ]
}

fn default_client_id_prefix() -> String {
    "iotown-mqtt-bridge".to_string()
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_publish_timeout() -> u64 {
    5000
}

fn default_progress_every() -> u64 {
    100
}

fn default_stats_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            source: BrokerConfig::chirpstack(),
            destination: BrokerConfig::iotown(),
            subscribe_topics: default_subscribe_topics(),
            mapping: MappingConfig::default(),
            client_id_prefix: default_client_id_prefix(),
            reconnect_interval_ms: default_reconnect_interval(),
            publish_timeout_ms: default_publish_timeout(),
            progress_every: default_progress_every(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// The result is not validated: environment overrides are usually applied
    /// afterwards, so callers validate once everything is merged.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.destination.host.is_empty() {
            missing.push("IOTOWN_MQTT_HOST");
        }
        if self.destination.username.as_deref().unwrap_or("").is_empty() {
            missing.push("IOTOWN_MQTT_USERNAME");
        }
        if self.destination.password.as_deref().unwrap_or("").is_empty() {
            missing.push("IOTOWN_MQTT_PASSWORD");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Missing required settings: {}",
                missing.join(", ")
            )));
        }

        if self.source.host.is_empty() {
            return Err(ConfigError::Invalid("Source broker host is empty".into()));
        }

        if self.subscribe_topics.is_empty() {
            return Err(ConfigError::Invalid("No source topics to subscribe".into()));
        }

        if self.client_id_prefix.is_empty() {
            return Err(ConfigError::Invalid("Client ID prefix is empty".into()));
        }

        self.mapping.applications.validate("application")?;
        self.mapping.gateways.validate("gateway")?;

        Ok(())
    }

    /// Application group mapping.
    pub fn application_groups(&self) -> &GroupMapping {
        &self.mapping.applications
    }

    /// Gateway group mapping.
    pub fn gateway_groups(&self) -> &GroupMapping {
        &self.mapping.gateways
    }

    /// Publish options used for every destination message.
    pub fn delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            qos: self.destination.qos,
            retain: false,
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub host: String,

    /// Broker port (1883 for plain TCP, 8883 for TLS).
    pub port: u16,

    /// Username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Use TLS.
    #[serde(default)]
    pub tls: bool,

    /// Verify the broker certificate (TLS only).
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,

    /// PEM file with the CA used to verify the broker (TLS only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// QoS for subscriptions (source) or publishes (destination).
    #[serde(default)]
    pub qos: Qos,

    /// Capacity of the client request channel.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> u64 {
    60
}

fn default_request_capacity() -> usize {
    1024
}

impl BrokerConfig {
    /// Create broker settings for a plain TCP connection.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: false,
            reject_unauthorized: true,
            ca_file: None,
            keep_alive_secs: default_keep_alive(),
            qos: Qos::default(),
            request_capacity: default_request_capacity(),
        }
    }

    /// Default ChirpStack broker (`mosquitto:1883`, no TLS).
    pub fn chirpstack() -> Self {
        Self::new("mosquitto", 1883)
    }

    /// Default IOTOWN broker settings (TLS on 8883, host required).
    pub fn iotown() -> Self {
        Self::new("", 1883).with_tls(true)
    }

    /// Set authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set TLS.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        if tls && self.port == 1883 {
            self.port = 8883;
        }
        self
    }

    /// Get the full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Broker URL for logging (credentials omitted).
    pub fn url(&self) -> String {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        format!("{}://{}", scheme, self.broker_addr())
    }
}

/// Both group mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Application ID -> group ID.
    #[serde(default = "GroupMapping::applications")]
    pub applications: GroupMapping,

    /// Gateway ID -> group ID.
    #[serde(default = "GroupMapping::gateways")]
    pub gateways: GroupMapping,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            applications: GroupMapping::applications(),
            gateways: GroupMapping::gateways(),
        }
    }
}

/// Source-side key to destination group ID, with a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping {
    /// Group used when the key has no entry.
    pub default_group: String,

    /// Explicit entries.
    #[serde(default)]
    pub groups: BTreeMap<String, String>,
}

impl GroupMapping {
    /// Create an empty mapping with a default group.
    pub fn new(default_group: impl Into<String>) -> Self {
        Self {
            default_group: default_group.into(),
            groups: BTreeMap::new(),
        }
    }

    /// Default application mapping (falls back to `default`).
    pub fn applications() -> Self {
        Self::new("default")
    }

    /// Default gateway mapping (falls back to `gateway`).
    pub fn gateways() -> Self {
        Self::new("gateway")
    }

    /// Add an entry.
    pub fn with(mut self, key: impl Into<String>, group: impl Into<String>) -> Self {
        self.groups.insert(key.into(), group.into());
        self
    }

    /// Replace the entries with a JSON object such as `{"app-42":"siteA"}`.
    pub fn set_from_json(&mut self, json: &str) -> Result<(), ConfigError> {
        self.groups = serde_json::from_str(json)?;
        Ok(())
    }

    /// Resolve a key to its group, falling back to the default.
    pub fn group_for(&self, key: &str) -> &str {
        self.groups
            .get(key)
            .map(String::as_str)
            .unwrap_or(&self.default_group)
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the mapping has no explicit entries.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn validate(&self, kind: &str) -> Result<(), ConfigError> {
        check_group_id(kind, "<default>", &self.default_group)?;
        for (key, group) in &self.groups {
            check_group_id(kind, key, group)?;
        }
        Ok(())
    }
}

/// Group IDs become a topic level, so they must be a single non-wildcard level.
fn check_group_id(kind: &str, key: &str, group: &str) -> Result<(), ConfigError> {
    if group.is_empty() || group.contains(['/', '+', '#']) {
        return Err(ConfigError::Invalid(format!(
            "Invalid {} group ID {:?} for {}",
            kind, group, key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.destination = BrokerConfig::iotown().with_auth("bridge", "secret");
        config.destination.host = "mqtt.iotown.example".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.source.broker_addr(), "mosquitto:1883");
        assert!(!config.source.tls);
        assert!(config.destination.tls);
        assert_eq!(config.destination.port, 8883);
        assert_eq!(config.mapping.applications.default_group, "default");
        assert_eq!(config.mapping.gateways.default_group, "gateway");
        assert_eq!(config.progress_every, 100);
        assert_eq!(config.subscribe_topics.len(), 2);
    }

    #[test]
    fn test_validation_missing_destination() {
        let err = BridgeConfig::default().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("IOTOWN_MQTT_HOST"));
        assert!(msg.contains("IOTOWN_MQTT_USERNAME"));
        assert!(msg.contains("IOTOWN_MQTT_PASSWORD"));

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validation_group_ids() {
        let mut config = valid_config();
        config.mapping.applications = GroupMapping::applications().with("app-1", "a/b");
        assert!(config.validate().is_err());

        config.mapping.applications = GroupMapping::applications();
        config.mapping.gateways = GroupMapping::new("#");
        assert!(config.validate().is_err());

        config.mapping.gateways = GroupMapping::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_group_mapping_lookup() {
        let mapping = GroupMapping::applications().with("app-42", "siteA");
        assert_eq!(mapping.group_for("app-42"), "siteA");
        assert_eq!(mapping.group_for("app-43"), "default");
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_group_mapping_from_json() {
        let mut mapping = GroupMapping::gateways();
        mapping
            .set_from_json(r#"{"gw-1":"north","gw-2":"south"}"#)
            .expect("valid json");
        assert_eq!(mapping.group_for("gw-2"), "south");
        assert_eq!(mapping.group_for("gw-7"), "gateway");

        assert!(mapping.set_from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_broker_tls_port() {
        let broker = BrokerConfig::new("localhost", 1883).with_tls(true);
        assert_eq!(broker.port, 8883);
        assert_eq!(broker.url(), "mqtts://localhost:8883");

        let broker = BrokerConfig::new("localhost", 9000).with_tls(true);
        assert_eq!(broker.port, 9000);
    }

    #[test]
    fn test_from_toml() {
        let config = BridgeConfig::from_toml(
            r#"
            name = "site-bridge"

            [source]
            host = "chirpstack.local"
            port = 1883

            [destination]
            host = "mqtt.iotown.example"
            port = 8883
            tls = true
            username = "bridge"
            password = "secret"
            qos = "at_most_once"

            [mapping.applications]
            default_group = "lab"

            [mapping.applications.groups]
            "app-42" = "siteA"
            "#,
        )
        .expect("parse");

        assert_eq!(config.name, "site-bridge");
        assert_eq!(config.source.host, "chirpstack.local");
        assert_eq!(config.destination.qos, Qos::AtMostOnce);
        assert!(config.destination.reject_unauthorized);
        assert_eq!(config.mapping.applications.group_for("app-42"), "siteA");
        assert_eq!(config.mapping.applications.group_for("other"), "lab");
        assert_eq!(config.mapping.gateways.default_group, "gateway");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        let toml_str = toml::to_string_pretty(&valid_config()).expect("serialize");
        std::fs::write(&path, toml_str).expect("write");

        let config = BridgeConfig::from_file(&path).expect("load");
        assert_eq!(config.destination.host, "mqtt.iotown.example");
        assert!(config.validate().is_ok());

        assert!(matches!(
            BridgeConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_delivery_options() {
        let options = valid_config().delivery_options();
        assert_eq!(options.qos, Qos::AtLeastOnce);
        assert!(!options.retain);
    }
}
