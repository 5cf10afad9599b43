//! Pure connection configuration for the MQTT session
//!
//! Turns [`SessionOptions`] into rumqttc options and holds the error type and
//! reconnect delay schedule used by the client.

use crate::error::AgentError;
use crate::protocol::QoS;
use crate::transport::SessionOptions;
use rumqttc::v5::{mqttbytes::QoS as MqttQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;

/// Connection state for one MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the broker to acknowledge the connect
    Connecting,
    /// Broker acknowledged; operations allowed
    Connected,
    /// Connection dropped with reason
    Disconnected(String),
    /// The session was closed locally
    Closed,
}

/// Delay schedule between broker reconnect attempts of an established session
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is used up
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] rumqttc::v5::ClientError),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] rumqttc::v5::ClientError),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

impl From<MqttError> for AgentError {
    fn from(error: MqttError) -> Self {
        match error {
            MqttError::ConnectionFailed(_) | MqttError::InvalidBrokerUrl(_) => {
                AgentError::session_connect_failure(error.to_string())
            }
            other => AgentError::transport(other.to_string()),
        }
    }
}

/// Map the agent QoS onto the rumqttc level
pub fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
    }
}

/// Build rumqttc options for a session connect
pub fn configure_mqtt_options(options: &SessionOptions) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&options.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(options.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(options.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // The device access token is the username; the password stays empty
    if let Some(username) = &options.username {
        mqtt_options.set_credentials(username, "");
    }

    mqtt_options.set_keep_alive(options.keepalive);
    mqtt_options.set_clean_start(options.clean_session);

    Ok(mqtt_options)
}
