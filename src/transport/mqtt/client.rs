//! rumqttc-backed messaging capability
//!
//! [`MqttMessaging::connect`] creates a client and event loop, spawns the
//! loop, and resolves once the broker acknowledges the connect. The spawned
//! loop forwards inbound publishes and broker-level reconnects to the
//! session supervisor through its [`SessionEventSink`].

use super::connection::{configure_mqtt_options, to_mqtt_qos, ConnectionState, MqttError, ReconnectConfig};
use super::message_handler::{EventRoute, MessageHandler};
use crate::error::{sanitize_error_message, AgentError};
use crate::protocol::{Subscription, TelemetryPayload};
use crate::transport::{MessagingCapability, SessionEventSink, SessionHandle, SessionOptions};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

/// Request channel capacity between the client handle and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Opens MQTT sessions with rumqttc
#[derive(Debug, Clone, Default)]
pub struct MqttMessaging {
    reconnect_config: ReconnectConfig,
}

impl MqttMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reconnect_config(reconnect_config: ReconnectConfig) -> Self {
        Self { reconnect_config }
    }
}

#[async_trait]
impl MessagingCapability for MqttMessaging {
    async fn connect(
        &self,
        options: &SessionOptions,
        events: SessionEventSink,
    ) -> Result<Arc<dyn SessionHandle>, AgentError> {
        let mqtt_options = configure_mqtt_options(options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let generation = events.generation();
        let handle = tokio::spawn(
            run_event_loop(
                event_loop,
                state_tx,
                shutdown_rx,
                events,
                self.reconnect_config.clone(),
            )
            .instrument(tracing::debug_span!("mqtt_event_loop", generation)),
        );

        let session = MqttSession {
            client,
            state_rx: state_rx.clone(),
            shutdown_tx,
            event_loop_handle: Mutex::new(Some(handle)),
        };

        if let Err(e) = wait_for_connection_confirmation(state_rx, options.connect_timeout).await {
            session.stop_event_loop();
            return Err(e.into());
        }

        info!(broker = %options.broker_url, client_id = %options.client_id, "MQTT session established");
        Ok(Arc::new(session))
    }
}

/// One open rumqttc session
pub struct MqttSession {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    fn stop_event_loop(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = match self.event_loop_handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl SessionHandle for MqttSession {
    async fn subscribe(&self, subscription: &Subscription) -> Result<(), AgentError> {
        self.check_connection_state()?;
        self.client
            .subscribe(&subscription.topic_pattern, to_mqtt_qos(subscription.qos))
            .await
            .map_err(MqttError::SubscriptionFailed)?;
        debug!(topic = %subscription.topic_pattern, "Subscribed");
        Ok(())
    }

    async fn publish(&self, payload: TelemetryPayload) -> Result<(), AgentError> {
        self.check_connection_state()?;
        let (topic, body, qos, retain) = payload.into_parts();
        self.client
            .publish(topic, to_mqtt_qos(qos), retain, body)
            .await
            .map_err(MqttError::PublishFailed)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AgentError> {
        if self.connection_state() == ConnectionState::Connected {
            // Best effort; the event loop is stopped either way
            if let Err(e) = self.client.disconnect().await {
                debug!(error = %e, "Disconnect request not delivered");
            }
        }
        self.stop_event_loop();
        Ok(())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.stop_event_loop();
    }
}

/// Wait for the first ConnAck of a session with timeout
async fn wait_for_connection_confirmation(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), MqttError> {
    let confirmation = tokio::time::timeout(timeout, async {
        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected(reason) => {
                    return Err(MqttError::ConnectionFailed(reason));
                }
                ConnectionState::Closed => {
                    return Err(MqttError::ConnectionFailed("session closed".to_string()));
                }
                ConnectionState::Connecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(MqttError::ConnectionFailed("state channel closed".to_string()));
            }
        }
    })
    .await;

    match confirmation {
        Ok(result) => result,
        Err(_) => Err(MqttError::ConnectionFailed(
            "ConnAck timeout - no connection confirmation received".to_string(),
        )),
    }
}

/// Sleep unless shutdown is requested first; returns false on shutdown
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    events: SessionEventSink,
    reconnect_config: ReconnectConfig,
) {
    let mut established = false;
    let mut reconnect_attempts = 0u32;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("MQTT event loop shutdown requested");
                break;
            }
            result = event_loop.poll() => match result {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if let Some(transport_event) = MessageHandler::transport_event(&route, established) {
                        if !events.deliver(transport_event) {
                            break;
                        }
                    }

                    match route {
                        EventRoute::ConnectionAcknowledged => {
                            if established {
                                info!(attempts = reconnect_attempts, "MQTT broker connection restored");
                            }
                            established = true;
                            reconnect_attempts = 0;
                            state_tx.send_replace(ConnectionState::Connected);
                        }
                        EventRoute::Disconnected => {
                            warn!("Broker sent disconnect");
                            state_tx.send_replace(ConnectionState::Disconnected(
                                "broker sent disconnect".to_string(),
                            ));
                        }
                        EventRoute::SubscriptionConfirmed { packet_id } => {
                            debug!(packet_id, "Subscription confirmed");
                        }
                        EventRoute::SubscriptionRejected { packet_id, reason } => {
                            warn!(packet_id, %reason, "Broker refused subscription");
                        }
                        EventRoute::PublishRejected { packet_id, reason } => {
                            warn!(packet_id, %reason, "Broker refused publish");
                        }
                        EventRoute::InfrastructureEvent(description) => {
                            trace!(event = %description, "MQTT event");
                        }
                        EventRoute::MessageReceived { .. } | EventRoute::OutgoingEvent => {}
                    }
                }
                Err(e) => {
                    let reason = sanitize_error_message(&e.to_string());
                    state_tx.send_replace(ConnectionState::Disconnected(reason.clone()));

                    // Before the first ConnAck the connect call reports the failure
                    if !established {
                        debug!(error = %reason, "MQTT connect failed");
                        break;
                    }

                    warn!(error = %reason, "MQTT connection lost, retrying");
                    if !events.on_error(reason.clone()) || !events.on_disconnected(reason) {
                        break;
                    }

                    reconnect_attempts += 1;
                    let delay_ms = reconnect_config.calculate_backoff_delay(reconnect_attempts);
                    if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                        break;
                    }
                }
            }
        }
    }

    // Keep a failure reason visible to a connect call still waiting on it
    state_tx.send_if_modified(|state| {
        if matches!(state, ConnectionState::Disconnected(_)) {
            return false;
        }
        *state = ConnectionState::Closed;
        true
    });
    debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state_tx.send_replace(ConnectionState::Connected);
            // Keep the sender alive until the waiter has seen the change
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result = wait_for_connection_confirmation(state_rx, Duration::from_secs(1)).await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_already_connected() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let result = wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let result = wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("ConnAck"),
            "Error should mention ConnAck, got: {err_msg}"
        );
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state_tx.send_replace(ConnectionState::Disconnected("Test disconnect".to_string()));
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result = wait_for_connection_confirmation(state_rx, Duration::from_secs(1)).await;
        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            shutdown_tx.send_replace(true);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        assert!(!interruptible_sleep(shutdown_rx, 1000).await);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let options = SessionOptions {
            broker_url: format!("mqtt://127.0.0.1:{port}"),
            client_id: "test-device".to_string(),
            username: None,
            keepalive: Duration::from_secs(60),
            clean_session: true,
            connect_timeout: Duration::from_secs(2),
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let result = MqttMessaging::new()
            .connect(&options, SessionEventSink::new(1, tx))
            .await;
        assert!(matches!(
            result,
            Err(AgentError::SessionConnectFailure { .. })
        ));
    }
}
