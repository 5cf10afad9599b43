//! Configuration system for the device agent
//!
//! Configuration lives in a TOML file. Secrets (Wi-Fi key, device access token)
//! are never stored in the file itself: the file names environment variables
//! that are resolved at runtime.

use crate::link::{LinkCredentials, SecurityMode};
use crate::protocol::{QoS, TELEMETRY_TOPIC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub device: DeviceSection,
    pub link: LinkSection,
    pub mqtt: MqttSection,
    /// Periodic telemetry producers, one per entry
    #[serde(default)]
    pub telemetry: Vec<TelemetrySection>,
    /// Remote-controlled actuator (optional)
    pub actuator: Option<ActuatorSection>,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// Wireless link section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// Network identifier
    pub ssid: String,
    /// Environment variable containing the pre-shared key
    pub psk_env: Option<String>,
    /// Weakest security mode the device accepts
    #[serde(default)]
    pub min_security: SecurityMode,
    /// Attach retries allowed after a failure before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Link watchdog interval in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Re-arm the attach state machine this long after the retry budget runs out
    pub rearm_after_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_probe_interval() -> u64 {
    10
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing the username (device access token)
    pub username_env: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Start every session without broker-side state
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Pause between session connect and (re-)subscribing
    #[serde(default = "default_subscribe_delay")]
    pub subscribe_delay_ms: u64,
    /// How long to wait for the broker to acknowledge a connect
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_keepalive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_subscribe_delay() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    10
}

/// One periodic telemetry producer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// JSON field name carried in the payload, e.g. "temperature"
    pub field: String,
    /// Tick period in milliseconds
    pub period_ms: u64,
    #[serde(default = "default_telemetry_topic")]
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub source: SampleSource,
    /// Seed for the synthetic source
    pub seed: Option<u32>,
}

fn default_telemetry_topic() -> String {
    TELEMETRY_TOPIC.to_string()
}

/// Where a producer gets its values from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    #[default]
    Synthetic,
}

/// Actuator section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorSection {
    #[serde(default = "default_pin")]
    pub pin: u8,
    /// Time the output stays high before returning to idle
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_actuator_qos")]
    pub qos: u8,
    /// Also publish status changes on the telemetry topic
    #[serde(default)]
    pub mirror_telemetry: bool,
}

fn default_pin() -> u8 {
    2
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_actuator_qos() -> u8 {
    1
}

impl Default for ActuatorSection {
    fn default() -> Self {
        Self {
            pin: default_pin(),
            settle_ms: default_settle_ms(),
            qos: default_actuator_qos(),
            mirror_telemetry: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        if self.link.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "link.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.link.probe_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "link.probe_interval_secs must be greater than 0".to_string(),
            ));
        }

        let scheme = self
            .mqtt
            .broker_url
            .split("://")
            .next()
            .unwrap_or_default();
        if !matches!(scheme, "mqtt" | "mqtts") || !self.mqtt.broker_url.contains("://") {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.broker_url '{}' must start with mqtt:// or mqtts://",
                self.mqtt.broker_url
            )));
        }

        for producer in &self.telemetry {
            if producer.period_ms == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "telemetry '{}' needs a period_ms greater than 0",
                    producer.field
                )));
            }
            if producer.field.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "telemetry field must not be empty".to_string(),
                ));
            }
            QoS::from_level(producer.qos)?;
        }

        if let Some(actuator) = &self.actuator {
            QoS::from_level(actuator.qos)?;
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get the MQTT username (device access token) from its environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Build link credentials, resolving the pre-shared key.
    ///
    /// Open networks need no key; any other security mode requires `psk_env`
    /// to name a variable that is set.
    pub fn link_credentials(&self) -> Result<LinkCredentials, ConfigError> {
        let psk = match (&self.link.psk_env, self.link.min_security) {
            (Some(env), _) => Self::get_env_var_required(env)?,
            (None, SecurityMode::Open) => String::new(),
            (None, mode) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "link.psk_env is required for security mode {mode:?}"
                )))
            }
        };

        Ok(LinkCredentials::new(
            self.link.ssid.clone(),
            psk,
            self.link.min_security,
        ))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"

[link]
ssid = "test-ap"
min_security = "open"
max_attempts = 3

[mqtt]
broker_url = "mqtt://localhost:1883"
subscribe_delay_ms = 0

[[telemetry]]
field = "temperature"
period_ms = 5000

[actuator]
pin = 2
settle_ms = 2000
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate device ID format
fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
