//! Periodic telemetry producer
//!
//! One task per configured `[[telemetry]]` entry. Each tick samples a value
//! and hands a single-field payload to the session supervisor. A tick whose
//! publish is refused is dropped; the schedule never slips to make up for it.

use super::sampler::{sampler_for, Sampler};
use crate::config::{ConfigError, TelemetrySection};
use crate::error::AgentResult;
use crate::observability::metrics;
use crate::producer_span;
use crate::protocol::{QoS, TelemetryPayload};
use crate::session::SessionSupervisor;
use crate::transport::MessageId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, Instrument};

pub struct TelemetryProducer {
    field: String,
    topic: String,
    qos: QoS,
    retain: bool,
    period: Duration,
    sampler: Box<dyn Sampler>,
    session: Arc<SessionSupervisor>,
}

impl TelemetryProducer {
    pub fn new(
        section: &TelemetrySection,
        sampler: Box<dyn Sampler>,
        session: Arc<SessionSupervisor>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            field: section.field.clone(),
            topic: section.topic.clone(),
            qos: QoS::from_level(section.qos)?,
            retain: section.retain,
            period: Duration::from_millis(section.period_ms),
            sampler,
            session,
        })
    }

    /// Producer with the sampler its section names
    pub fn from_config(
        section: &TelemetrySection,
        session: Arc<SessionSupervisor>,
    ) -> Result<Self, ConfigError> {
        Self::new(section, sampler_for(section), session)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sample once and build the payload for this tick
    pub fn next_payload(&mut self) -> TelemetryPayload {
        let value = self.sampler.sample();
        TelemetryPayload::single_field(&self.topic, &self.field, value, self.qos, self.retain)
    }

    /// Run one tick: sample and attempt a publish
    pub async fn tick(&mut self) -> AgentResult<MessageId> {
        let payload = self.next_payload();
        let result = self.session.publish(payload).await;
        metrics().producer_tick(&self.field, result.is_ok());

        if let Err(e) = &result {
            debug!(field = %self.field, reason = %e, "Tick dropped");
        }
        result
    }

    /// Tick every period until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let span = producer_span!(field = %self.field, period_ms = self.period.as_millis() as u64);

        async move {
            info!(topic = %self.topic, "Telemetry producer started");
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let _ = self.tick().await;
                    }
                }
            }
            info!("Telemetry producer stopped");
        }
        .instrument(span)
        .await
    }
}
