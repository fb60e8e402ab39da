// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Loaded from a TOML file (or the JSON options file of a Home Assistant
//! add-on), then overlaid by `PW3MQTT_<KEY>` environment variables and
//! validated. Without an explicit file, the add-on options at
//! [`ADDON_OPTIONS`] are used when present.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix of the environment variables overriding file values.
pub const ENV_PREFIX: &str = "PW3MQTT_";

/// Prefix read by earlier add-on releases; [`ENV_PREFIX`] wins over it.
pub const LEGACY_ENV_PREFIX: &str = "POWERWALL3MQTT_CONFIG_";

/// Options file written by the Home Assistant supervisor.
pub const ADDON_OPTIONS: &str = "/data/options.json";

/// Smallest accepted poll interval, in seconds.
pub const MIN_POLL_INTERVAL: u64 = 5;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: '{value}'")]
    Env { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Gateway address.
    pub tedapi_host: String,
    /// Gateway password (printed on the gateway label).
    pub tedapi_password: Option<String>,
    /// Seconds between two polls.
    pub tedapi_poll_interval: u64,
    /// Also report per-Powerwall vitals.
    pub tedapi_report_vitals: bool,
    /// HTTP request timeout (seconds).
    pub tedapi_timeout: u64,
    /// Quiet period after the gateway rate limits us (seconds).
    pub tedapi_cooldown: u64,
    /// Bound on waiting for a query lock (seconds).
    pub tedapi_lock_timeout: u64,
    /// TTL of telemetry queries (seconds).
    pub tedapi_cache_ttl: u64,
    /// TTL of configuration queries (seconds).
    pub tedapi_config_ttl: u64,

    /// Discovery prefix, also used for the availability topic.
    pub mqtt_base_topic: String,
    pub mqtt_host: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_ssl: bool,
    /// Verify the broker certificate and host name.
    pub mqtt_verify_tls: bool,
    /// CA certificate (PEM file).
    pub mqtt_ca: Option<String>,
    /// Client certificate (PEM file).
    pub mqtt_cert: Option<String>,
    /// Client key (PEM file).
    pub mqtt_key: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            tedapi_host: tedapi::GATEWAY_IP.to_string(),
            tedapi_password: None,
            tedapi_poll_interval: 30,
            tedapi_report_vitals: false,
            tedapi_timeout: 5,
            tedapi_cooldown: 300,
            tedapi_lock_timeout: 5,
            tedapi_cache_ttl: 4,
            tedapi_config_ttl: 29,
            mqtt_base_topic: "homeassistant".to_string(),
            mqtt_host: None,
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_ssl: false,
            mqtt_verify_tls: true,
            mqtt_ca: None,
            mqtt_cert: None,
            mqtt_key: None,
        }
    }
}

impl BridgeConfig {
    /// Read a configuration file; `.json` files are parsed as add-on options.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    /// File (or defaults), then the process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match source_file(path, Path::new(ADDON_OPTIONS)) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PW3MQTT_<KEY>` and legacy `POWERWALL3MQTT_CONFIG_<KEY>`
    /// overrides; unknown variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        for prefix in [LEGACY_ENV_PREFIX, ENV_PREFIX] {
            for (name, value) in &vars {
                let Some(key) = name.strip_prefix(prefix) else {
                    continue;
                };
                self.set(&key.to_ascii_lowercase(), value)
                    .map_err(|_| ConfigError::Env {
                        key: name.clone(),
                        value: value.clone(),
                    })?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ()> {
        let text = || Some(value.to_string());
        match key {
            "log_level" => self.log_level = value.to_string(),
            "tedapi_host" => self.tedapi_host = value.to_string(),
            "tedapi_password" => self.tedapi_password = text(),
            "tedapi_poll_interval" => self.tedapi_poll_interval = parse_int(value)?,
            "tedapi_report_vitals" => self.tedapi_report_vitals = parse_bool(value)?,
            "tedapi_timeout" => self.tedapi_timeout = parse_int(value)?,
            "tedapi_cooldown" => self.tedapi_cooldown = parse_int(value)?,
            "tedapi_lock_timeout" => self.tedapi_lock_timeout = parse_int(value)?,
            "tedapi_cache_ttl" => self.tedapi_cache_ttl = parse_int(value)?,
            "tedapi_config_ttl" => self.tedapi_config_ttl = parse_int(value)?,
            "mqtt_base_topic" => self.mqtt_base_topic = value.to_string(),
            "mqtt_host" => self.mqtt_host = text(),
            "mqtt_port" => self.mqtt_port = parse_int(value)?,
            "mqtt_username" => self.mqtt_username = text(),
            "mqtt_password" => self.mqtt_password = text(),
            "mqtt_ssl" => self.mqtt_ssl = parse_bool(value)?,
            "mqtt_verify_tls" => self.mqtt_verify_tls = parse_bool(value)?,
            "mqtt_ca" => self.mqtt_ca = text(),
            "mqtt_cert" => self.mqtt_cert = text(),
            "mqtt_key" => self.mqtt_key = text(),
            _ => {}
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_unset(&self.tedapi_password) {
            return Err(ConfigError::Invalid("tedapi_password not set".into()));
        }
        if is_unset(&self.mqtt_host) || self.mqtt_port == 0 {
            return Err(ConfigError::Invalid("MQTT connection info not set".into()));
        }
        if is_unset(&self.mqtt_username) || is_unset(&self.mqtt_password) {
            return Err(ConfigError::Invalid(
                "MQTT authentication info not set".into(),
            ));
        }
        if self.tedapi_poll_interval < MIN_POLL_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "Polling interval must be >= {}",
                MIN_POLL_INTERVAL
            )));
        }
        if self.mqtt_cert.is_some() != self.mqtt_key.is_some() {
            return Err(ConfigError::Invalid(
                "MQTT certificate and key are both required".into(),
            ));
        }
        if self.mqtt_base_topic.is_empty() {
            return Err(ConfigError::Invalid("mqtt_base_topic is empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.tedapi_poll_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.tedapi_timeout)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.tedapi_cooldown)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.tedapi_lock_timeout)
    }

    /// Availability topic published by Home Assistant.
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.mqtt_base_topic)
    }

    /// Sorted `(key, value)` pairs with secrets masked, for logging.
    pub fn redacted(&self) -> Vec<(&'static str, String)> {
        fn opt(value: &Option<String>) -> String {
            value.clone().unwrap_or_else(|| "None".to_string())
        }

        let mut entries = vec![
            ("log_level", self.log_level.clone()),
            ("mqtt_base_topic", self.mqtt_base_topic.clone()),
            ("mqtt_ca", opt(&self.mqtt_ca)),
            ("mqtt_cert", opt(&self.mqtt_cert)),
            ("mqtt_host", opt(&self.mqtt_host)),
            ("mqtt_key", opt(&self.mqtt_key)),
            ("mqtt_password", mask(&self.mqtt_password)),
            ("mqtt_port", self.mqtt_port.to_string()),
            ("mqtt_ssl", self.mqtt_ssl.to_string()),
            ("mqtt_username", opt(&self.mqtt_username)),
            ("mqtt_verify_tls", self.mqtt_verify_tls.to_string()),
            ("tedapi_cache_ttl", self.tedapi_cache_ttl.to_string()),
            ("tedapi_config_ttl", self.tedapi_config_ttl.to_string()),
            ("tedapi_cooldown", self.tedapi_cooldown.to_string()),
            ("tedapi_host", self.tedapi_host.clone()),
            ("tedapi_lock_timeout", self.tedapi_lock_timeout.to_string()),
            ("tedapi_password", mask(&self.tedapi_password)),
            ("tedapi_poll_interval", self.tedapi_poll_interval.to_string()),
            ("tedapi_report_vitals", self.tedapi_report_vitals.to_string()),
            ("tedapi_timeout", self.tedapi_timeout.to_string()),
        ];
        entries.sort_by_key(|(key, _)| *key);
        entries
    }

    /// Example file written by `gen-config`.
    pub fn example() -> Self {
        Self {
            log_level: "info".into(),
            tedapi_password: Some("ABCDEFGHIJ".into()),
            mqtt_host: Some("mqtt.local".into()),
            mqtt_username: Some("powerwall".into()),
            mqtt_password: Some("secret".into()),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.redacted() {
            map.entry(&key, &value);
        }
        map.finish()
    }
}

/// Explicit file, else `fallback` when it exists.
fn source_file(explicit: Option<&Path>, fallback: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None if fallback.is_file() => Some(fallback.to_path_buf()),
        None => None,
    }
}

fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn mask(value: &Option<String>) -> String {
    match value {
        Some(secret) => "X".repeat(secret.chars().count()),
        None => "None".to_string(),
    }
}

fn parse_int<N: std::str::FromStr>(value: &str) -> Result<N, ()> {
    value.trim().parse().map_err(|_| ())
}

fn parse_bool(value: &str) -> Result<bool, ()> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.tedapi_host, "192.168.91.1");
        assert_eq!(config.tedapi_poll_interval, 30);
        assert_eq!(config.tedapi_cache_ttl, 4);
        assert_eq!(config.tedapi_config_ttl, 29);
        assert_eq!(config.mqtt_port, 1883);
        assert!(config.mqtt_verify_tls);
        assert_eq!(config.status_topic(), "homeassistant/status");
        // no password, no broker
        assert!(config.validate().is_err());
        assert!(BridgeConfig::example().validate().is_ok());
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
tedapi_password = "PW"
tedapi_poll_interval = 10
mqtt_host = "broker"
mqtt_username = "u"
mqtt_password = "p"
"#
        )
        .unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tedapi_password.as_deref(), Some("PW"));
        assert_eq!(config.tedapi_poll_interval, 10);
        assert_eq!(config.mqtt_port, 1883);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_options_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"tedapi_password": "PW", "tedapi_report_vitals": true, "mqtt_host": "core-mosquitto"}}"#
        )
        .unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert!(config.tedapi_report_vitals);
        assert_eq!(config.mqtt_host.as_deref(), Some("core-mosquitto"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[
                ("PW3MQTT_TEDAPI_PASSWORD", "secret"),
                ("PW3MQTT_TEDAPI_POLL_INTERVAL", "15"),
                ("PW3MQTT_TEDAPI_REPORT_VITALS", "True"),
                ("PW3MQTT_MQTT_PORT", "8883"),
                ("PW3MQTT_UNKNOWN", "ignored"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.tedapi_password.as_deref(), Some("secret"));
        assert_eq!(config.tedapi_poll_interval, 15);
        assert!(config.tedapi_report_vitals);
        assert_eq!(config.mqtt_port, 8883);
    }

    #[test]
    fn test_legacy_env_prefix() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[
                ("PW3MQTT_MQTT_HOST", "broker"),
                ("POWERWALL3MQTT_CONFIG_MQTT_HOST", "old-broker"),
                ("POWERWALL3MQTT_CONFIG_TEDAPI_PASSWORD", "legacy"),
                ("POWERWALL3MQTT_CONFIG_MQTT_VERIFY_TLS", "False"),
            ]))
            .unwrap();

        // the current prefix wins whatever the variable order
        assert_eq!(config.mqtt_host.as_deref(), Some("broker"));
        assert_eq!(config.tedapi_password.as_deref(), Some("legacy"));
        assert!(!config.mqtt_verify_tls);
    }

    #[test]
    fn test_addon_options_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let options = dir.path().join("options.json");
        let explicit = dir.path().join("pw3mqtt.toml");

        assert_eq!(source_file(None, &options), None);
        assert_eq!(
            source_file(Some(explicit.as_path()), &options),
            Some(explicit.clone())
        );

        std::fs::write(&options, r#"{"tedapi_password": "PW", "mqtt_verify_tls": false}"#)
            .unwrap();
        let found = source_file(None, &options).unwrap();
        assert_eq!(found, options);
        // an explicit file still wins
        assert_eq!(source_file(Some(explicit.as_path()), &options), Some(explicit));

        let config = BridgeConfig::from_file(found).unwrap();
        assert_eq!(config.tedapi_password.as_deref(), Some("PW"));
        assert!(!config.mqtt_verify_tls);
    }

    #[test]
    fn test_env_rejects_malformed_numbers() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_env(env(&[("PW3MQTT_TEDAPI_POLL_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));

        assert!(config
            .apply_env(env(&[("PW3MQTT_MQTT_SSL", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_validation_rules() {
        let valid = BridgeConfig::example();

        let mut config = valid.clone();
        config.tedapi_poll_interval = 4;
        assert!(config.validate().is_err());
        config.tedapi_poll_interval = 5;
        assert!(config.validate().is_ok());

        let mut config = valid.clone();
        config.mqtt_cert = Some("cert.pem".into());
        assert!(config.validate().is_err());
        config.mqtt_key = Some("key.pem".into());
        assert!(config.validate().is_ok());

        let mut config = valid.clone();
        config.mqtt_password = None;
        assert!(config.validate().is_err());

        let mut config = valid;
        config.tedapi_password = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_redacted() {
        let config = BridgeConfig::example();
        let entries = config.redacted();
        let lookup = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(lookup("tedapi_password"), "XXXXXXXXXX");
        assert_eq!(lookup("mqtt_password"), "XXXXXX");
        assert_eq!(lookup("mqtt_username"), "powerwall");
        assert!(!format!("{:?}", config).contains("secret"));

        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }
}
