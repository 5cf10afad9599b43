//! Session supervisor
//!
//! Follows link edges: opens a session on `Up`, tears it down on `Lost`.
//! State, generation and the session handle live under one lock. Link edges
//! are applied synchronously under that lock; slow work (connecting,
//! subscribing, disconnecting) is queued to [`SessionSupervisor::run`] and
//! its results are checked against the generation before they are applied.

use super::state::SessionState;
use crate::action::ActionChannel;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::link::{LinkEvent, LinkObserver};
use crate::observability::metrics;
use crate::protocol::{parse_command, topic_matches, ActionKind, QoS, Subscription, TelemetryPayload, RPC_REQUEST_PATTERN};
use crate::session_span;
use crate::transport::{
    Generation, MessageId, MessagingCapability, SessionEventSink, SessionHandle, SessionOptions,
    TransportEvent,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Static session parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub options: SessionOptions,
    /// Pause between the session becoming Ready and (re-)subscribing
    pub subscribe_delay: Duration,
    pub subscriptions: Vec<Subscription>,
}

impl SessionSettings {
    /// Session for the configured broker, listening for RPC requests
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            options: SessionOptions::from_config(config),
            subscribe_delay: Duration::from_millis(config.mqtt.subscribe_delay_ms),
            subscriptions: vec![Subscription::new(RPC_REQUEST_PATTERN, QoS::AtMostOnce)],
        }
    }
}

/// Work queued to the supervisor loop
enum SessionCommand {
    Connect(Generation),
    ConnectFinished(Generation, Result<Arc<dyn SessionHandle>, AgentError>),
    Subscribe(Generation),
    Close(Arc<dyn SessionHandle>),
}

struct Inner {
    state: SessionState,
    generation: Generation,
    handle: Option<Arc<dyn SessionHandle>>,
}

/// Owns the messaging session lifecycle.
///
/// `Ready` implies the link is attached: the supervisor leaves `Ready` inside
/// the link's `Lost` notification, which is delivered before the link leaves
/// `Attached`, and enters `Ready` only for the generation opened by the most
/// recent `Up`.
pub struct SessionSupervisor {
    messaging: Arc<dyn MessagingCapability>,
    settings: SessionSettings,
    actions: Arc<ActionChannel>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionCommand>>>,
    events_tx: mpsc::UnboundedSender<(Generation, TransportEvent)>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<(Generation, TransportEvent)>>>,
    next_message_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionSupervisor {
    pub fn new(
        messaging: Arc<dyn MessagingCapability>,
        actions: Arc<ActionChannel>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Down);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            messaging,
            settings,
            actions,
            inner: Mutex::new(Inner {
                state: SessionState::Down,
                generation: 0,
                handle: None,
            }),
            state_tx,
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_message_id: AtomicU64::new(0),
            shutdown_tx,
        })
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current session generation; bumped on every link edge
    pub fn generation(&self) -> Generation {
        self.lock().generation
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.settings.subscriptions
    }

    /// Send a payload through the open session.
    ///
    /// Fails with [`AgentError::SessionNotReady`] unless the session is
    /// `Ready`; the payload is dropped, never queued.
    pub async fn publish(&self, payload: TelemetryPayload) -> AgentResult<MessageId> {
        let handle = {
            let inner = self.lock();
            match (&inner.handle, inner.state.can_publish()) {
                (Some(handle), true) => Arc::clone(handle),
                _ => {
                    metrics().publish_dropped();
                    debug!(topic = %payload.topic(), state = %inner.state, "Dropping publish, session not ready");
                    return Err(AgentError::SessionNotReady);
                }
            }
        };

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let topic = payload.topic().to_string();
        match handle.publish(payload).await {
            Ok(()) => {
                metrics().message_published();
                debug!(%topic, message_id, "Published");
                Ok(message_id)
            }
            Err(e) => {
                // The handle may have been torn down after it was cloned
                metrics().publish_failed();
                warn!(%topic, error = %e.sanitized(), "Publish failed");
                Err(e)
            }
        }
    }

    /// Handle an inbound message: recognised commands go to the action channel.
    ///
    /// Messages on topics outside the subscriptions and bodies without a
    /// command token are ignored.
    pub fn on_inbound_message(&self, topic: &str, body: &[u8]) -> Option<ActionKind> {
        metrics().message_received();

        let subscribed = self
            .settings
            .subscriptions
            .iter()
            .any(|subscription| topic_matches(&subscription.topic_pattern, topic));
        if !subscribed {
            debug!(%topic, "Ignoring message on unsubscribed topic");
            return None;
        }

        match parse_command(body) {
            Some(kind) => {
                info!(%topic, ?kind, "Command accepted");
                metrics().command_accepted();
                self.actions.set_action(kind);
                Some(kind)
            }
            None => {
                let ignored = AgentError::malformed_command(topic);
                debug!(reason = %ignored, "Ignoring inbound message");
                metrics().command_ignored();
                None
            }
        }
    }

    /// Spawn the supervisor loop on the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Process queued work and transport events until shutdown
    pub async fn run(self: Arc<Self>) {
        let commands = take_receiver(&self.commands_rx);
        let events = take_receiver(&self.events_rx);
        let (Some(mut commands), Some(mut events)) = (commands, events) else {
            warn!("Session supervisor loop already running");
            return;
        };

        let span = session_span!(client_id = %self.settings.options.client_id);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        // A new receiver treats the current value as seen
        if *shutdown_rx.borrow() {
            return;
        }

        async move {
            info!("Session supervisor started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Session supervisor stopping");
                        break;
                    }
                    Some(command) = commands.recv() => self.handle_command(command).await,
                    Some((generation, event)) = events.recv() => self.handle_transport_event(generation, event),
                    else => break,
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Close any open session and stop the supervisor loop
    pub async fn close(&self) {
        let handle = {
            let mut inner = self.lock();
            inner.generation += 1;
            let handle = inner.handle.take();
            self.set_state(&mut inner, SessionState::Down);
            handle
        };
        metrics().session_closed();

        if let Some(handle) = handle {
            if let Err(e) = handle.disconnect().await {
                debug!(error = %e.sanitized(), "Session disconnect failed");
            }
        }
        self.shutdown_tx.send_replace(true);
    }

    async fn handle_command(&self, command: SessionCommand) {
        match command {
            SessionCommand::Connect(generation) => self.start_connect(generation),
            SessionCommand::ConnectFinished(generation, result) => {
                self.complete_connect(generation, result)
            }
            SessionCommand::Subscribe(generation) => self.apply_subscriptions(generation).await,
            SessionCommand::Close(handle) => {
                if let Err(e) = handle.disconnect().await {
                    debug!(error = %e.sanitized(), "Session disconnect failed");
                }
            }
        }
    }

    fn start_connect(&self, generation: Generation) {
        if self.generation() != generation {
            debug!(generation, "Skipping connect for superseded generation");
            return;
        }

        metrics().session_connect_attempted();
        info!(generation, broker = %self.settings.options.broker_url, "Connecting session");

        let messaging = Arc::clone(&self.messaging);
        let options = self.settings.options.clone();
        let sink = SessionEventSink::new(generation, self.events_tx.clone());
        let commands = self.commands_tx.clone();
        tokio::spawn(
            async move {
                let result = messaging.connect(&options, sink).await;
                let _ = commands.send(SessionCommand::ConnectFinished(generation, result));
            }
            .in_current_span(),
        );
    }

    fn complete_connect(&self, generation: Generation, result: Result<Arc<dyn SessionHandle>, AgentError>) {
        let mut inner = self.lock();

        if inner.generation != generation || inner.state != SessionState::Connecting {
            drop(inner);
            debug!(generation, "Discarding stale connect result");
            if let Ok(handle) = result {
                self.enqueue(SessionCommand::Close(handle));
            }
            return;
        }

        match result {
            Ok(handle) => {
                inner.handle = Some(handle);
                self.set_state(&mut inner, SessionState::Ready);
                drop(inner);
                metrics().session_established();
                info!(generation, "Session ready");
                self.schedule_subscribe(generation);
            }
            Err(e) => {
                self.set_state(&mut inner, SessionState::Down);
                drop(inner);
                metrics().session_connect_failed();
                warn!(generation, error = %e.sanitized(), "Session connect failed, waiting for next link up");
            }
        }
    }

    fn schedule_subscribe(&self, generation: Generation) {
        let delay = self.settings.subscribe_delay;
        if delay.is_zero() {
            self.enqueue(SessionCommand::Subscribe(generation));
            return;
        }

        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(SessionCommand::Subscribe(generation));
        });
    }

    async fn apply_subscriptions(&self, generation: Generation) {
        let handle = {
            let inner = self.lock();
            if inner.generation != generation || inner.state != SessionState::Ready {
                debug!(generation, "Skipping subscribe, session changed");
                return;
            }
            inner.handle.clone()
        };
        let Some(handle) = handle else { return };

        for subscription in &self.settings.subscriptions {
            match handle.subscribe(subscription).await {
                Ok(()) => info!(topic = %subscription.topic_pattern, qos = subscription.qos.level(), "Subscription applied"),
                Err(e) => warn!(topic = %subscription.topic_pattern, error = %e.sanitized(), "Subscribe failed"),
            }
        }
    }

    fn handle_transport_event(&self, generation: Generation, event: TransportEvent) {
        if generation != self.generation() {
            debug!(generation, ?event, "Discarding event from superseded session");
            return;
        }

        match event {
            TransportEvent::Message { topic, body } => {
                self.on_inbound_message(&topic, &body);
            }
            TransportEvent::Disconnected { reason } => {
                let mut inner = self.lock();
                if inner.state == SessionState::Ready {
                    self.set_state(&mut inner, SessionState::Connecting);
                    drop(inner);
                    metrics().session_interrupted();
                    warn!(%reason, "Broker connection interrupted, transport reconnecting");
                }
            }
            TransportEvent::Error { reason } => {
                // The session stays as it is; a fatal error arrives as Disconnected too
                metrics().transport_error();
                warn!(generation, state = %self.state(), %reason, "Transport error");
            }
            TransportEvent::Connected => {
                let mut inner = self.lock();
                if inner.state == SessionState::Connecting && inner.handle.is_some() {
                    self.set_state(&mut inner, SessionState::Ready);
                    drop(inner);
                    metrics().session_established();
                    info!(generation, "Broker connection restored");
                    self.schedule_subscribe(generation);
                }
            }
        }
    }

    fn on_link_up(&self) {
        if *self.shutdown_tx.borrow() {
            debug!("Session closed, ignoring link up");
            return;
        }
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;
        if let Some(stale) = inner.handle.take() {
            self.enqueue(SessionCommand::Close(stale));
        }
        self.set_state(&mut inner, SessionState::Connecting);
        drop(inner);

        self.enqueue(SessionCommand::Connect(generation));
    }

    fn on_link_lost(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if inner.state == SessionState::Down {
            return;
        }

        self.set_state(&mut inner, SessionState::Closing);
        if let Some(handle) = inner.handle.take() {
            self.enqueue(SessionCommand::Close(handle));
        }
        self.set_state(&mut inner, SessionState::Down);
        drop(inner);

        metrics().session_closed();
        info!("Session closed after link loss");
    }

    fn set_state(&self, inner: &mut MutexGuard<'_, Inner>, state: SessionState) {
        if inner.state != state {
            debug!(from = %inner.state, to = %state, "Session state change");
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn enqueue(&self, command: SessionCommand) {
        if self.commands_tx.send(command).is_err() {
            warn!("Session supervisor inbox closed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkObserver for SessionSupervisor {
    fn on_link_event(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Up => self.on_link_up(),
            LinkEvent::Lost { .. } => self.on_link_lost(),
            LinkEvent::Failed { attempts } => {
                debug!(attempts, "Link gave up; session stays down until re-armed");
            }
        }
    }
}

fn take_receiver<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    match slot.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}
