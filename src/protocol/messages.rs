//! Outbound payloads and inbound command recognition
//!
//! Outbound bodies are single-field JSON objects such as `{"temperature": 42}`
//! or `{"status": "ON"}`. Inbound commands are recognised by a plain substring
//! match for the `ON` token; there is no structured RPC parsing.

use crate::config::ConfigError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token that turns the actuator on when found in an RPC request body
pub const TURN_ON_TOKEN: &str = "ON";

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

impl QoS {
    /// Map a numeric QoS level (0 or 1) to the enum
    pub fn from_level(level: u8) -> Result<Self, ConfigError> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(ConfigError::InvalidConfig(format!(
                "QoS {other} is not supported, use 0 or 1"
            ))),
        }
    }

    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

/// A remote-triggered request to change physical state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    TurnOn,
}

/// Status values reported by the actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActuatorStatus {
    On,
    Off,
}

/// A standing registration for inbound messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_pattern: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic_pattern: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic_pattern: topic_pattern.into(),
            qos,
        }
    }
}

/// One outbound message: topic, opaque body, delivery flags.
///
/// Immutable once built; `SessionSupervisor::publish` takes it by value.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPayload {
    topic: String,
    body: Bytes,
    qos: QoS,
    retain: bool,
}

impl TelemetryPayload {
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
            qos,
            retain,
        }
    }

    /// Build a `{"<field>": <value>}` payload
    pub fn single_field(
        topic: impl Into<String>,
        field: &str,
        value: impl Into<Value>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        Self::new(topic, encode_single_field(field, value), qos, retain)
    }

    /// Build a `{"status": "ON" | "OFF"}` payload
    pub fn status(topic: impl Into<String>, status: ActuatorStatus, qos: QoS) -> Self {
        let value = serde_json::to_value(status).unwrap_or(Value::Null);
        Self::single_field(topic, "status", value, qos, false)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Split into owned parts for transmission
    pub fn into_parts(self) -> (String, Bytes, QoS, bool) {
        (self.topic, self.body, self.qos, self.retain)
    }
}

/// Serialize a single-field JSON object
pub fn encode_single_field(field: &str, value: impl Into<Value>) -> Vec<u8> {
    let mut object = Map::new();
    object.insert(field.to_string(), value.into());
    // Serializing a map of JSON values cannot fail
    serde_json::to_vec(&Value::Object(object)).unwrap_or_default()
}

/// Look for a known action token in an inbound command body.
///
/// Deliberately a substring match: any body containing `ON` triggers the
/// action, everything else is ignored.
pub fn parse_command(body: &[u8]) -> Option<ActionKind> {
    let token = TURN_ON_TOKEN.as_bytes();
    body.windows(token.len())
        .any(|window| window == token)
        .then_some(ActionKind::TurnOn)
}
