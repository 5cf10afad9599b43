//! Mock implementations for testing
//!
//! Provides mock network, messaging, session and pin implementations so the
//! supervisors can be exercised without a radio, a broker or GPIO.

use crate::error::AgentError;
use crate::hardware::{PinDriver, PinLevel};
use crate::link::{LinkCredentials, LinkNotifier, NetworkCapability, SecurityMode};
use crate::protocol::{Subscription, TelemetryPayload};
use crate::transport::{MessagingCapability, SessionEventSink, SessionHandle, SessionOptions, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock network capability with scripted attach outcomes
#[derive(Debug, Default)]
pub struct MockNetwork {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    delays: Mutex<VecDeque<Duration>>,
    pub should_fail: bool,
    access_point_security: Option<SecurityMode>,
    attach_calls: AtomicU32,
    notifier: Mutex<Option<LinkNotifier>>,
}

impl MockNetwork {
    /// Every attach succeeds unless scripted otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attach fails unless scripted otherwise
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Simulate an access point offering `mode`
    pub fn with_access_point_security(mut self, mode: SecurityMode) -> Self {
        self.access_point_security = Some(mode);
        self
    }

    /// Queue outcomes for the next attach calls, in order
    pub fn script(&self, outcomes: impl IntoIterator<Item = Result<(), String>>) {
        if let Ok(mut queue) = self.outcomes.lock() {
            queue.extend(outcomes);
        }
    }

    /// Queue how long the next attach calls take to settle, in order
    pub fn script_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        if let Ok(mut queue) = self.delays.lock() {
            queue.extend(delays);
        }
    }

    pub fn attach_calls(&self) -> u32 {
        self.attach_calls.load(Ordering::SeqCst)
    }

    /// Report link loss through the notifier of the last attach
    pub fn drop_link(&self, reason: &str) {
        if let Some(notifier) = self.notifier.lock().ok().and_then(|n| n.clone()) {
            notifier.disconnected(reason);
        }
    }
}

#[async_trait]
impl NetworkCapability for MockNetwork {
    async fn attach(
        &self,
        credentials: &LinkCredentials,
        notifier: LinkNotifier,
    ) -> Result<(), AgentError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.notifier.lock() {
            *slot = Some(notifier);
        }

        if let Some(offered) = self.access_point_security {
            if !credentials.min_security().accepts(offered) {
                return Err(AgentError::attach_failure(format!(
                    "access point offers {offered:?}, below threshold"
                )));
            }
        }

        let scripted = self.outcomes.lock().ok().and_then(|mut q| q.pop_front());
        let delay = self.delays.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match scripted {
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(AgentError::attach_failure(reason)),
            None if self.should_fail => Err(AgentError::attach_failure("mock attach failure")),
            None => Ok(()),
        }
    }
}

/// Mock session recording every call
#[derive(Debug, Default)]
pub struct MockSession {
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub published: Mutex<Vec<TelemetryPayload>>,
    disconnected: AtomicBool,
    pub should_fail: bool,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn get_published(&self) -> Vec<TelemetryPayload> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), AgentError> {
        if self.is_disconnected() {
            return Err(AgentError::transport("session disconnected"));
        }
        if self.should_fail {
            return Err(AgentError::transport("mock transport failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for MockSession {
    async fn subscribe(&self, subscription: &Subscription) -> Result<(), AgentError> {
        self.check_open()?;
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.push(subscription.clone());
        }
        Ok(())
    }

    async fn publish(&self, payload: TelemetryPayload) -> Result<(), AgentError> {
        self.check_open()?;
        if let Ok(mut published) = self.published.lock() {
            published.push(payload);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AgentError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock messaging capability handing out [`MockSession`]s
#[derive(Debug, Default)]
pub struct MockMessaging {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    pub should_fail: bool,
    connect_delay: Option<Duration>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    options: Mutex<Vec<SessionOptions>>,
    sink: Mutex<Option<SessionEventSink>>,
}

impl MockMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Delay every connect, to let link edges overtake it
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Queue outcomes for the next connect calls, in order
    pub fn script(&self, outcomes: impl IntoIterator<Item = Result<(), String>>) {
        if let Ok(mut queue) = self.outcomes.lock() {
            queue.extend(outcomes);
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.options.lock().map(|o| o.len()).unwrap_or_default()
    }

    pub fn connect_options(&self) -> Vec<SessionOptions> {
        self.options.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Sessions handed out so far, oldest first
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions().pop()
    }

    /// Deliver an event as the most recently connected session
    pub fn inject(&self, event: TransportEvent) -> bool {
        let sink = self.sink.lock().ok().and_then(|s| s.clone());
        sink.map(|sink| sink.deliver(event)).unwrap_or(false)
    }

    /// Deliver an inbound message as the most recently connected session
    pub fn inject_message(&self, topic: &str, body: &[u8]) -> bool {
        self.inject(TransportEvent::Message {
            topic: topic.to_string(),
            body: Bytes::copy_from_slice(body),
        })
    }
}

#[async_trait]
impl MessagingCapability for MockMessaging {
    async fn connect(
        &self,
        options: &SessionOptions,
        events: SessionEventSink,
    ) -> Result<Arc<dyn SessionHandle>, AgentError> {
        if let Ok(mut recorded) = self.options.lock() {
            recorded.push(options.clone());
        }
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.outcomes.lock().ok().and_then(|mut q| q.pop_front());
        let outcome = match scripted {
            Some(outcome) => outcome,
            None if self.should_fail => Err("mock connect refused".to_string()),
            None => Ok(()),
        };
        outcome.map_err(AgentError::session_connect_failure)?;

        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(events);
        }
        let session = Arc::new(MockSession::new());
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(Arc::clone(&session));
        }
        Ok(session)
    }
}

/// Mock pin driver recording every level change
#[derive(Debug, Default)]
pub struct MockPinDriver {
    pub changes: Mutex<Vec<(u8, PinLevel)>>,
}

impl MockPinDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_changes(&self) -> Vec<(u8, PinLevel)> {
        self.changes.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl PinDriver for MockPinDriver {
    fn set_level(&self, pin: u8, level: PinLevel) -> Result<(), AgentError> {
        if let Ok(mut changes) = self.changes.lock() {
            changes.push((pin, level));
        }
        Ok(())
    }
}
