//! Messaging transport abstraction
//!
//! The session supervisor talks to the broker only through
//! [`MessagingCapability`] and the [`SessionHandle`] it returns, so the MQTT
//! implementation in [`mqtt`] can be swapped for a mock in tests.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::protocol::{Subscription, TelemetryPayload};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod mqtt;

/// Locally assigned identifier for an accepted publish
pub type MessageId = u64;

/// Session generation; bumped on every link-up so stale results can be told apart
pub type Generation = u64;

/// Parameters for one session connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub broker_url: String,
    pub client_id: String,
    /// Device access token, sent as the MQTT username
    pub username: Option<String>,
    pub keepalive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            broker_url: config.mqtt.broker_url.clone(),
            client_id: config.device.id.clone(),
            username: config.get_mqtt_username(),
            keepalive: Duration::from_secs(config.mqtt.keepalive_secs),
            clean_session: config.mqtt.clean_session,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Asynchronous notifications from an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound message on a subscribed topic
    Message { topic: String, body: Bytes },
    /// The transport re-established the broker connection on its own
    Connected,
    /// The broker connection dropped; the transport will keep retrying
    Disconnected { reason: String },
    /// The transport hit an error it reports without closing the session
    Error { reason: String },
}

/// Delivery path from a session back into its supervisor.
///
/// Every event is tagged with the generation the session was opened for.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<(Generation, TransportEvent)>,
}

impl SessionEventSink {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<(Generation, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Forward an event; returns false once the supervisor is gone
    pub fn deliver(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn on_message(&self, topic: impl Into<String>, body: Bytes) -> bool {
        self.deliver(TransportEvent::Message {
            topic: topic.into(),
            body,
        })
    }

    pub fn on_connected(&self) -> bool {
        self.deliver(TransportEvent::Connected)
    }

    pub fn on_disconnected(&self, reason: impl Into<String>) -> bool {
        self.deliver(TransportEvent::Disconnected {
            reason: reason.into(),
        })
    }

    pub fn on_error(&self, reason: impl Into<String>) -> bool {
        self.deliver(TransportEvent::Error {
            reason: reason.into(),
        })
    }
}

/// Platform facility that opens messaging sessions
#[async_trait]
pub trait MessagingCapability: Send + Sync {
    /// Open a session; resolves once the broker accepted the connect
    async fn connect(
        &self,
        options: &SessionOptions,
        events: SessionEventSink,
    ) -> Result<Arc<dyn SessionHandle>, AgentError>;
}

/// An open messaging session
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn subscribe(&self, subscription: &Subscription) -> Result<(), AgentError>;

    async fn publish(&self, payload: TelemetryPayload) -> Result<(), AgentError>;

    /// Close the session; further calls on the handle fail
    async fn disconnect(&self) -> Result<(), AgentError>;
}
