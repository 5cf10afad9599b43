//! Network capability for general-purpose hosts
//!
//! A host has no radio to associate, so "attaching" means proving the broker
//! endpoint is reachable: resolve it and open a TCP connection within a
//! deadline. After a successful attach a watchdog repeats the probe and
//! reports the link lost on the first failure. The watchdog exits as soon
//! as the link supervisor stops listening.

use super::{LinkCredentials, LinkNotifier, NetworkCapability};
use crate::config::AgentConfig;
use crate::error::AgentError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};
use url::Url;

const MQTT_PORT: u16 = 1883;
const MQTTS_PORT: u16 = 8883;

/// Reachability-based link for hosts with an always-on network stack
#[derive(Debug, Clone)]
pub struct HostNetwork {
    endpoint: String,
    attach_timeout: Duration,
    probe_interval: Duration,
}

impl HostNetwork {
    pub fn new(endpoint: impl Into<String>, attach_timeout: Duration, probe_interval: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            attach_timeout,
            probe_interval,
        }
    }

    /// Probe the configured broker endpoint
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let endpoint = broker_endpoint(&config.mqtt.broker_url)?;
        Ok(Self::new(
            endpoint,
            config.connect_timeout(),
            Duration::from_secs(config.link.probe_interval_secs),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn probe(&self) -> Result<(), AgentError> {
        match timeout(self.attach_timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(AgentError::attach_failure(format!(
                "{} unreachable: {e}",
                self.endpoint
            ))),
            Err(_) => Err(AgentError::attach_failure(format!(
                "{} did not answer within {:?}",
                self.endpoint, self.attach_timeout
            ))),
        }
    }
}

#[async_trait]
impl NetworkCapability for HostNetwork {
    async fn attach(
        &self,
        credentials: &LinkCredentials,
        notifier: LinkNotifier,
    ) -> Result<(), AgentError> {
        debug!(ssid = %credentials.ssid(), endpoint = %self.endpoint, "Probing network");
        self.probe().await?;
        info!(endpoint = %self.endpoint, "Network reachable");

        let watchdog = self.clone();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(watchdog.probe_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = notifier.closed() => {
                            debug!("Link supervisor stopped, watchdog exiting");
                            break;
                        }
                        _ = ticker.tick() => {}
                    }
                    if let Err(e) = watchdog.probe().await {
                        warn!(error = %e.sanitized(), "Link watchdog probe failed");
                        notifier.disconnected(e.sanitized());
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        Ok(())
    }
}

/// Extract `host:port` from an `mqtt://` or `mqtts://` broker URL
pub fn broker_endpoint(broker_url: &str) -> Result<String, AgentError> {
    let url = Url::parse(broker_url)
        .map_err(|e| AgentError::internal(format!("invalid broker URL: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| AgentError::internal("broker URL has no host"))?;
    let port = url.port().unwrap_or(match url.scheme() {
        "mqtts" => MQTTS_PORT,
        _ => MQTT_PORT,
    });

    Ok(format!("{host}:{port}"))
}
