//! Link supervisor task
//!
//! Owns the [`LinkMachine`], serializes every input through a single inbox
//! and performs the side effects the machine asks for: issuing attach
//! requests, notifying observers, scheduling a re-arm.

use super::state::{AttachAttempt, AttachTicket, LinkDirective, LinkEvent, LinkMachine, LinkSignal, LinkState};
use super::{LinkCredentials, LinkNotifier, LinkObserver, NetworkCapability};
use crate::config::LinkSection;
use crate::link_span;
use crate::observability::metrics;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Retry policy for the attach cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    /// Retries allowed after a failure or loss before giving up
    pub max_attempts: u32,
    /// Re-arm automatically this long after the budget ran out
    pub rearm_after: Option<Duration>,
}

impl LinkPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            rearm_after: None,
        }
    }

    pub fn from_config(section: &LinkSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            rearm_after: section.rearm_after_secs.map(Duration::from_secs),
        }
    }
}

/// Drives the wireless attach and raises link edges to observers.
///
/// All inputs (start requests, attach results, disconnect notifications,
/// re-arms) go through one inbox and are applied in arrival order by
/// [`LinkSupervisor::run`]. Observers are called while the state lock is
/// held; they take their own locks and never call back into this type, so
/// the lock order is always link before observer.
pub struct LinkSupervisor {
    credentials: LinkCredentials,
    network: Arc<dyn NetworkCapability>,
    policy: LinkPolicy,
    machine: Mutex<LinkMachine>,
    observers: RwLock<Vec<Arc<dyn LinkObserver>>>,
    state_tx: watch::Sender<LinkState>,
    inbox_tx: mpsc::UnboundedSender<LinkSignal>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkSignal>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl LinkSupervisor {
    pub fn new(
        credentials: LinkCredentials,
        network: Arc<dyn NetworkCapability>,
        policy: LinkPolicy,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(LinkState::Idle);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            credentials,
            network,
            policy,
            machine: Mutex::new(LinkMachine::new(policy.max_attempts)),
            observers: RwLock::new(Vec::new()),
            state_tx,
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            shutdown_tx,
        })
    }

    /// Register a receiver for link edges
    pub fn subscribe(&self, observer: Arc<dyn LinkObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Request the link. Idempotent while an attach cycle is running.
    pub fn start(&self) {
        self.enqueue(LinkSignal::Start);
    }

    /// Restart attach attempts after the retry budget ran out
    pub fn rearm(&self) {
        self.enqueue(LinkSignal::Rearm);
    }

    /// Report that the link went away
    pub fn on_disconnected(&self, reason: impl Into<String>) {
        self.enqueue(LinkSignal::Disconnected(reason.into()));
    }

    /// Handle for the network capability to report into this supervisor
    pub fn notifier(&self) -> LinkNotifier {
        LinkNotifier::new(self.inbox_tx.clone())
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn attempt(&self) -> AttachAttempt {
        self.lock_machine().attempt()
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock_machine().is_exhausted()
    }

    /// Ticket of the attach whose result the supervisor is waiting for
    pub fn pending_attach(&self) -> Option<AttachTicket> {
        self.lock_machine().pending_attach()
    }

    /// Stop the supervisor loop
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Apply one signal and notify observers.
    ///
    /// Returns what the caller must do next. [`LinkSupervisor::run`] acts on
    /// the directive; tests may call this directly to drive the machine
    /// without a network.
    pub fn process(&self, signal: LinkSignal) -> LinkDirective {
        let rearming = matches!(signal, LinkSignal::Rearm);
        let observers = self.observer_snapshot();
        let mut machine = self.lock_machine();

        let directive = machine.step(signal, &mut |event| {
            match &event {
                LinkEvent::Up => {
                    self.state_tx.send_replace(LinkState::Attached);
                    metrics().link_up();
                }
                LinkEvent::Lost { .. } => metrics().link_lost(),
                LinkEvent::Failed { .. } => metrics().link_failed(),
            }
            for observer in &observers {
                observer.on_link_event(&event);
            }
        });
        self.state_tx.send_replace(machine.state());

        if directive.attach.is_some() {
            metrics().attach_attempted();
            if rearming {
                metrics().link_rearmed();
            }
        }
        directive
    }

    /// Spawn the supervisor loop on the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Consume inbox signals until shutdown
    pub async fn run(self: Arc<Self>) {
        let inbox = match self.inbox_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut inbox) = inbox else {
            warn!("Link supervisor loop already running");
            return;
        };

        let span = link_span!(ssid = %self.credentials.ssid(), max_attempts = self.policy.max_attempts);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        // A new receiver treats the current value as seen
        if *shutdown_rx.borrow() {
            return;
        }

        async move {
            info!("Link supervisor started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Link supervisor stopping");
                        break;
                    }
                    signal = inbox.recv() => {
                        let Some(signal) = signal else { break };
                        debug!(?signal, "Link signal");
                        let directive = self.process(signal);
                        if let Some(ticket) = directive.attach {
                            self.issue_attach(ticket);
                        }
                        if directive.exhausted {
                            self.schedule_rearm();
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    fn issue_attach(&self, ticket: AttachTicket) {
        let network = Arc::clone(&self.network);
        let credentials = self.credentials.clone();
        let notifier = self.notifier();

        debug!(%ticket, "Issuing attach");
        tokio::spawn(
            async move {
                match network.attach(&credentials, notifier.clone()).await {
                    Ok(()) => notifier.attach_succeeded(ticket),
                    Err(e) => {
                        metrics().attach_failed();
                        notifier.attach_failed(ticket, e.sanitized());
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn schedule_rearm(&self) {
        let Some(delay) = self.policy.rearm_after else {
            return;
        };

        info!(delay_secs = delay.as_secs(), "Scheduling automatic re-arm");
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(LinkSignal::Rearm);
        });
    }

    fn enqueue(&self, signal: LinkSignal) {
        if self.inbox_tx.send(signal).is_err() {
            warn!("Link supervisor inbox closed");
        }
    }

    fn observer_snapshot(&self) -> Vec<Arc<dyn LinkObserver>> {
        match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_machine(&self) -> std::sync::MutexGuard<'_, LinkMachine> {
        self.machine
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::link::SecurityMode;
    use async_trait::async_trait;

    struct NeverAttaches;

    #[async_trait]
    impl NetworkCapability for NeverAttaches {
        async fn attach(
            &self,
            _credentials: &LinkCredentials,
            _notifier: LinkNotifier,
        ) -> Result<(), AgentError> {
            Err(AgentError::attach_failure("unreachable"))
        }
    }

    /// Records each event together with the link state visible at that moment
    struct StateProbe {
        state: watch::Receiver<LinkState>,
        seen: Mutex<Vec<(LinkEvent, LinkState)>>,
    }

    impl LinkObserver for StateProbe {
        fn on_link_event(&self, event: &LinkEvent) {
            let state = *self.state.borrow();
            self.seen.lock().unwrap().push((event.clone(), state));
        }
    }

    fn supervisor(max_attempts: u32) -> Arc<LinkSupervisor> {
        LinkSupervisor::new(
            LinkCredentials::new("LiB", "secret", SecurityMode::Wpa2Psk),
            Arc::new(NeverAttaches),
            LinkPolicy::new(max_attempts),
        )
    }

    #[test]
    fn test_observers_see_attached_during_edges() {
        let link = supervisor(3);
        let probe = Arc::new(StateProbe {
            state: link.watch_state(),
            seen: Mutex::new(Vec::new()),
        });
        link.subscribe(probe.clone());

        let ticket = link.process(LinkSignal::Start).attach.unwrap();
        link.process(LinkSignal::AttachSucceeded(ticket));
        link.process(LinkSignal::Disconnected("beacon timeout".into()));

        let seen = probe.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (LinkEvent::Up, LinkState::Attached),
                (
                    LinkEvent::Lost {
                        reason: "beacon timeout".into()
                    },
                    LinkState::Attached
                ),
            ]
        );
        assert_eq!(link.state(), LinkState::Backoff);
    }

    #[test]
    fn test_state_is_published_after_each_signal() {
        let link = supervisor(1);
        assert_eq!(link.state(), LinkState::Idle);

        let first = link.process(LinkSignal::Start).attach.unwrap();
        assert_eq!(link.state(), LinkState::Attaching);

        let retry = link
            .process(LinkSignal::AttachFailed(first, "timeout".into()))
            .attach
            .unwrap();
        assert_eq!(link.state(), LinkState::Backoff);
        assert_eq!(link.attempt().attempt_count, 1);
        assert_eq!(link.pending_attach(), Some(retry));

        let directive = link.process(LinkSignal::AttachFailed(retry, "timeout".into()));
        assert!(directive.exhausted);
        assert!(link.is_exhausted());
    }

    #[test]
    fn test_policy_from_config() {
        let section = LinkSection {
            rearm_after_secs: Some(30),
            ..crate::config::AgentConfig::test_config().link
        };
        let policy = LinkPolicy::from_config(&section);
        assert_eq!(policy.max_attempts, section.max_attempts);
        assert_eq!(policy.rearm_after, Some(Duration::from_secs(30)));
    }

    struct FailureCounter(Mutex<u32>);

    impl LinkObserver for FailureCounter {
        fn on_link_event(&self, event: &LinkEvent) {
            if matches!(event, LinkEvent::Failed { .. }) {
                *self.0.lock().unwrap() += 1;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_exhausts_budget_then_rearms() {
        let link = LinkSupervisor::new(
            LinkCredentials::new("LiB", "secret", SecurityMode::Wpa2Psk),
            Arc::new(NeverAttaches),
            LinkPolicy {
                max_attempts: 2,
                rearm_after: Some(Duration::from_secs(60)),
            },
        );
        let failures = Arc::new(FailureCounter(Mutex::new(0)));
        link.subscribe(failures.clone());
        let handle = link.spawn();
        let mut state = link.watch_state();

        link.start();
        while *failures.0.lock().unwrap() < 1 {
            state.changed().await.unwrap();
        }
        assert!(link.is_exhausted());
        assert_eq!(link.attempt().attempt_count, 2);

        // The timed re-arm restarts the cycle, which fails through again
        while *failures.0.lock().unwrap() < 2 {
            state.changed().await.unwrap();
        }
        assert!(link.is_exhausted());

        link.shutdown();
        handle.await.unwrap();
    }
}
