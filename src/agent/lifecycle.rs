//! Device agent lifecycle
//!
//! Owns the connectivity context and the producer tasks: `start` spawns the
//! supervisor loops and producers and requests the link, `shutdown` stops
//! the link before closing the session and then stops every task.

use super::context::ConnectivityContext;
use crate::config::{AgentConfig, ConfigError};
use crate::hardware::PinDriver;
use crate::link::NetworkCapability;
use crate::telemetry::{Actuator, TelemetryProducer};
use crate::transport::MessagingCapability;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long shutdown waits for each task to finish
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DeviceAgent {
    config: AgentConfig,
    context: ConnectivityContext,
    pin_driver: Arc<dyn PinDriver>,
    shutdown_tx: watch::Sender<bool>,
    link_handle: Option<JoinHandle<()>>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl DeviceAgent {
    pub fn new(
        config: AgentConfig,
        network: Arc<dyn NetworkCapability>,
        messaging: Arc<dyn MessagingCapability>,
        pin_driver: Arc<dyn PinDriver>,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        let context = ConnectivityContext::from_config(&config, network, messaging)?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            context,
            pin_driver,
            shutdown_tx,
            link_handle: None,
            handles: Vec::new(),
            started: false,
        })
    }

    pub fn context(&self) -> &ConnectivityContext {
        &self.context
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Spawn supervisors and producers, then request the link
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.started {
            return Err(LifecycleError::AlreadyStarted);
        }
        info!(device_id = %self.config.device.id, "Starting device agent");

        // Build every producer before spawning anything so a bad section
        // leaves nothing running
        let producers = self
            .config
            .telemetry
            .iter()
            .map(|section| TelemetryProducer::from_config(section, Arc::clone(&self.context.session)))
            .collect::<Result<Vec<_>, _>>()?;

        let actuator = self
            .config
            .actuator
            .as_ref()
            .map(|section| {
                Actuator::new(
                    section,
                    Arc::clone(&self.pin_driver),
                    Arc::clone(&self.context.actions),
                    Arc::clone(&self.context.session),
                )
            })
            .transpose()?;

        self.handles.push(self.context.session.spawn());
        self.link_handle = Some(self.context.link.spawn());

        for producer in producers {
            info!(field = %producer.field(), period_ms = producer.period().as_millis() as u64, "Starting telemetry producer");
            self.handles
                .push(tokio::spawn(producer.run(self.shutdown_tx.subscribe())));
        }

        if let Some(actuator) = actuator {
            self.handles
                .push(tokio::spawn(actuator.run(self.shutdown_tx.subscribe())));
        }

        self.context.link.start();
        self.started = true;
        info!(tasks = self.handles.len() + 1, "Device agent started");
        Ok(())
    }

    /// Stop the link, close the session and stop every task
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        if !self.started {
            return Ok(());
        }
        info!(device_id = %self.config.device.id, "Shutting down device agent");

        self.shutdown_tx.send_replace(true);

        // The link loop must be gone before the session closes, otherwise a
        // queued attach result can reopen it
        self.context.link.shutdown();
        if let Some(handle) = self.link_handle.take() {
            join_task(handle).await;
        }
        self.context.session.close().await;

        for handle in self.handles.drain(..) {
            join_task(handle).await;
        }

        self.started = false;
        info!("Device agent stopped");
        Ok(())
    }
}

async fn join_task(handle: JoinHandle<()>) {
    match tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Task ended abnormally"),
        Err(_) => warn!("Task did not stop in time"),
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error")]
    ConfigurationError(#[from] ConfigError),
    #[error("Agent already started")]
    AlreadyStarted,
}
