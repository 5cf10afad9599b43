//! Remote-controlled actuator
//!
//! Waits on the [`ActionChannel`]; a `TurnOn` drives the output high,
//! reports `ON`, holds for the settle delay, drives it low and reports `OFF`.
//! Each report is an independent publish, dropped if the session is not
//! ready at that moment.

use crate::action::ActionChannel;
use crate::config::{ActuatorSection, ConfigError};
use crate::hardware::{PinDriver, PinLevel};
use crate::observability::metrics;
use crate::producer_span;
use crate::protocol::{ActionKind, ActuatorStatus, QoS, TelemetryPayload, ATTRIBUTES_TOPIC, TELEMETRY_TOPIC};
use crate::session::SessionSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

/// Outcome of one executed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuationReport {
    /// Status publishes the session accepted
    pub published: u32,
    /// Status publishes dropped or failed
    pub dropped: u32,
}

pub struct Actuator {
    pin: u8,
    settle: Duration,
    qos: QoS,
    mirror_telemetry: bool,
    driver: Arc<dyn PinDriver>,
    actions: Arc<ActionChannel>,
    session: Arc<SessionSupervisor>,
}

impl Actuator {
    pub fn new(
        section: &ActuatorSection,
        driver: Arc<dyn PinDriver>,
        actions: Arc<ActionChannel>,
        session: Arc<SessionSupervisor>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            pin: section.pin,
            settle: Duration::from_millis(section.settle_ms),
            qos: QoS::from_level(section.qos)?,
            mirror_telemetry: section.mirror_telemetry,
            driver,
            actions,
            session,
        })
    }

    /// Carry out one action
    pub async fn execute(&self, kind: ActionKind) -> ActuationReport {
        let mut report = ActuationReport::default();

        match kind {
            ActionKind::TurnOn => {
                info!(pin = self.pin, "Turning actuator on");
                self.drive(PinLevel::High);
                self.report(ActuatorStatus::On, &mut report).await;

                tokio::time::sleep(self.settle).await;

                self.drive(PinLevel::Low);
                self.report(ActuatorStatus::Off, &mut report).await;
                info!(pin = self.pin, "Actuator back to idle");
            }
        }

        metrics().action_executed();
        report
    }

    /// Execute actions as they arrive until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = producer_span!(actuator_pin = self.pin, settle_ms = self.settle.as_millis() as u64);

        async move {
            info!("Actuator started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    kind = self.actions.wait_action() => {
                        self.execute(kind).await;
                    }
                }
            }
            info!("Actuator stopped");
        }
        .instrument(span)
        .await
    }

    fn drive(&self, level: PinLevel) {
        if let Err(e) = self.driver.set_level(self.pin, level) {
            warn!(pin = self.pin, ?level, error = %e, "Failed to set pin level");
        }
    }

    async fn report(&self, status: ActuatorStatus, report: &mut ActuationReport) {
        let mut topics = vec![ATTRIBUTES_TOPIC];
        if self.mirror_telemetry {
            topics.push(TELEMETRY_TOPIC);
        }

        for topic in topics {
            let payload = TelemetryPayload::status(topic, status, self.qos);
            match self.session.publish(payload).await {
                Ok(_) => report.published += 1,
                Err(_) => report.dropped += 1,
            }
        }
    }
}
