//! Pure attach state machine
//!
//! [`LinkMachine`] holds the link state and retry budget and decides, for each
//! incoming [`LinkSignal`], what the new state is, which [`LinkEvent`]s fire
//! and whether another attach must be issued. It performs no I/O, so the
//! retry policy can be tested without a runtime.

use std::fmt;
use tracing::{debug, info, warn};

/// Wireless link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not started
    Idle,
    /// First attach of a cycle in flight
    Attaching,
    /// Link established
    Attached,
    /// Retrying after a failure or loss, or out of retries
    Backoff,
}

/// Retry budget for one attach cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachAttempt {
    pub attempt_count: u32,
    pub max_attempts: u32,
}

impl AttachAttempt {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
        }
    }

    pub fn has_budget(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

/// Identity of one issued attach.
///
/// A result is applied only while its ticket is the one in flight, so a slow
/// attach that was superseded cannot settle the attempt that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachTicket(u64);

impl fmt::Display for AttachTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inputs to the attach state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// Begin attaching (ignored unless Idle)
    Start,
    /// The network capability reported a successful attach
    AttachSucceeded(AttachTicket),
    /// The network capability refused or timed out the attach
    AttachFailed(AttachTicket, String),
    /// The network capability reported the link went away
    Disconnected(String),
    /// Restart attempts after the retry budget ran out
    Rearm,
}

/// Edge-triggered notifications raised to link observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is attached; dependent sessions may start
    Up,
    /// An attached link was lost; dependent sessions must stop
    Lost { reason: String },
    /// The retry budget is exhausted and no further attach will be issued
    Failed { attempts: u32 },
}

/// What the supervisor must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkDirective {
    /// Issue a new attach request to the network capability, tagged with this ticket
    pub attach: Option<AttachTicket>,
    /// The retry budget was exhausted by this transition
    pub exhausted: bool,
}

/// Attach state machine with its retry bookkeeping
#[derive(Debug, Clone)]
pub struct LinkMachine {
    state: LinkState,
    attempt: AttachAttempt,
    in_flight: Option<AttachTicket>,
    tickets_issued: u64,
    exhausted: bool,
}

impl LinkMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: LinkState::Idle,
            attempt: AttachAttempt::new(max_attempts),
            in_flight: None,
            tickets_issued: 0,
            exhausted: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempt(&self) -> AttachAttempt {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn attach_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Ticket of the attach whose result is currently awaited
    pub fn pending_attach(&self) -> Option<AttachTicket> {
        self.in_flight
    }

    /// Apply one signal.
    ///
    /// `emit` is called at the exact point of the transition the event
    /// belongs to: `Lost` while the state is still `Attached`, `Up` after the
    /// state became `Attached`. Observers that react synchronously therefore
    /// never see a dependent session outlive its link.
    pub fn step(&mut self, signal: LinkSignal, emit: &mut dyn FnMut(LinkEvent)) -> LinkDirective {
        match signal {
            LinkSignal::Start => self.start(),
            LinkSignal::AttachSucceeded(ticket) => self.attach_succeeded(ticket, emit),
            LinkSignal::AttachFailed(ticket, reason) => self.attach_failed(ticket, reason, emit),
            LinkSignal::Disconnected(reason) => self.disconnected(reason, emit),
            LinkSignal::Rearm => self.rearm(),
        }
    }

    fn start(&mut self) -> LinkDirective {
        if self.state != LinkState::Idle {
            debug!(state = ?self.state, "Ignoring start: attach cycle already running");
            return LinkDirective::default();
        }

        self.state = LinkState::Attaching;
        self.issue()
    }

    fn issue(&mut self) -> LinkDirective {
        self.tickets_issued += 1;
        let ticket = AttachTicket(self.tickets_issued);
        self.in_flight = Some(ticket);
        LinkDirective {
            attach: Some(ticket),
            exhausted: false,
        }
    }

    /// Clear the in-flight ticket if `ticket` is it
    fn settle(&mut self, ticket: AttachTicket) -> bool {
        if self.in_flight != Some(ticket) {
            debug!(%ticket, pending = ?self.in_flight, state = ?self.state, "Ignoring stale attach result");
            return false;
        }
        self.in_flight = None;
        true
    }

    fn attach_succeeded(&mut self, ticket: AttachTicket, emit: &mut dyn FnMut(LinkEvent)) -> LinkDirective {
        if !self.settle(ticket) {
            return LinkDirective::default();
        }

        self.exhausted = false;
        self.attempt.reset();
        self.state = LinkState::Attached;
        info!("Link attached");
        emit(LinkEvent::Up);
        LinkDirective::default()
    }

    fn attach_failed(
        &mut self,
        ticket: AttachTicket,
        reason: String,
        emit: &mut dyn FnMut(LinkEvent),
    ) -> LinkDirective {
        if !self.settle(ticket) {
            return LinkDirective::default();
        }

        warn!(%reason, %ticket, attempt = self.attempt.attempt_count, "Attach failed");
        self.retry_or_give_up(emit)
    }

    fn disconnected(&mut self, reason: String, emit: &mut dyn FnMut(LinkEvent)) -> LinkDirective {
        match self.state {
            LinkState::Attached => {
                warn!(%reason, "Link lost");
                emit(LinkEvent::Lost { reason });
                self.retry_or_give_up(emit)
            }
            // While attaching, the network reports a failed association as a
            // disconnect. It settles the pending attempt; that attach's own
            // late result then carries a superseded ticket and is dropped.
            LinkState::Attaching | LinkState::Backoff => match self.in_flight {
                Some(ticket) => self.attach_failed(ticket, reason, emit),
                None => {
                    debug!(state = ?self.state, %reason, "Ignoring disconnect notification");
                    LinkDirective::default()
                }
            },
            _ => {
                debug!(state = ?self.state, %reason, "Ignoring disconnect notification");
                LinkDirective::default()
            }
        }
    }

    fn retry_or_give_up(&mut self, emit: &mut dyn FnMut(LinkEvent)) -> LinkDirective {
        self.state = LinkState::Backoff;

        if self.attempt.has_budget() {
            self.attempt.attempt_count += 1;
            info!(
                attempt = self.attempt.attempt_count,
                max_attempts = self.attempt.max_attempts,
                "Retrying attach"
            );
            return self.issue();
        }

        if self.exhausted {
            return LinkDirective::default();
        }

        self.exhausted = true;
        warn!(
            attempts = self.attempt.attempt_count,
            "Attach retry budget exhausted, giving up until re-armed"
        );
        emit(LinkEvent::Failed {
            attempts: self.attempt.attempt_count,
        });
        LinkDirective {
            attach: None,
            exhausted: true,
        }
    }

    fn rearm(&mut self) -> LinkDirective {
        if !self.exhausted {
            debug!(state = ?self.state, "Ignoring re-arm: retry budget not exhausted");
            return LinkDirective::default();
        }

        info!("Re-arming attach state machine");
        self.exhausted = false;
        self.attempt.reset();
        self.state = LinkState::Attaching;
        self.issue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step(machine: &mut LinkMachine, signal: LinkSignal) -> (LinkDirective, Vec<LinkEvent>) {
        let mut events = Vec::new();
        let directive = machine.step(signal, &mut |event| events.push(event));
        (directive, events)
    }

    /// Fail whatever attach is in flight
    fn fail(machine: &mut LinkMachine) -> (LinkDirective, Vec<LinkEvent>) {
        let ticket = machine.pending_attach().expect("attach in flight");
        step(machine, LinkSignal::AttachFailed(ticket, "no AP".to_string()))
    }

    fn succeed(machine: &mut LinkMachine) -> (LinkDirective, Vec<LinkEvent>) {
        let ticket = machine.pending_attach().expect("attach in flight");
        step(machine, LinkSignal::AttachSucceeded(ticket))
    }

    #[test]
    fn test_start_from_idle_issues_attach() {
        let mut machine = LinkMachine::new(5);
        let (directive, events) = step(&mut machine, LinkSignal::Start);

        assert!(directive.attach.is_some());
        assert!(events.is_empty());
        assert_eq!(machine.state(), LinkState::Attaching);
    }

    #[test]
    fn test_start_is_idempotent_while_attaching() {
        let mut machine = LinkMachine::new(5);
        step(&mut machine, LinkSignal::Start);

        let (directive, _) = step(&mut machine, LinkSignal::Start);
        assert!(!directive.attach.is_some());
        assert_eq!(machine.state(), LinkState::Attaching);
    }

    #[test]
    fn test_success_resets_attempts_and_emits_up() {
        let mut machine = LinkMachine::new(5);
        step(&mut machine, LinkSignal::Start);
        fail(&mut machine);
        assert_eq!(machine.attempt().attempt_count, 1);

        let (_, events) = succeed(&mut machine);
        assert_eq!(events, vec![LinkEvent::Up]);
        assert_eq!(machine.state(), LinkState::Attached);
        assert_eq!(machine.attempt().attempt_count, 0);
    }

    #[test]
    fn test_disconnect_while_attached_emits_lost_then_retries() {
        let mut machine = LinkMachine::new(5);
        step(&mut machine, LinkSignal::Start);
        succeed(&mut machine);

        let (directive, events) =
            step(&mut machine, LinkSignal::Disconnected("beacon timeout".into()));
        assert_eq!(
            events,
            vec![LinkEvent::Lost {
                reason: "beacon timeout".into()
            }]
        );
        assert!(directive.attach.is_some());
        assert_eq!(machine.state(), LinkState::Backoff);
        assert_eq!(machine.attempt().attempt_count, 1);
    }

    #[test]
    fn test_budget_exhaustion_emits_single_failed() {
        let mut machine = LinkMachine::new(2);
        step(&mut machine, LinkSignal::Start);
        fail(&mut machine);
        fail(&mut machine);

        let (directive, events) = fail(&mut machine);
        assert!(directive.exhausted);
        assert!(!directive.attach.is_some());
        assert_eq!(events, vec![LinkEvent::Failed { attempts: 2 }]);
        assert_eq!(machine.state(), LinkState::Backoff);

        // Nothing is in flight any more; further notifications are ignored
        let (directive, events) = step(&mut machine, LinkSignal::Disconnected("x".into()));
        assert_eq!(directive, LinkDirective::default());
        assert!(events.is_empty());
    }

    #[test]
    fn test_start_does_not_rearm() {
        let mut machine = LinkMachine::new(1);
        step(&mut machine, LinkSignal::Start);
        fail(&mut machine);
        fail(&mut machine);
        assert!(machine.is_exhausted());

        let (directive, _) = step(&mut machine, LinkSignal::Start);
        assert!(!directive.attach.is_some());
    }

    #[test]
    fn test_rearm_after_exhaustion() {
        let mut machine = LinkMachine::new(1);
        step(&mut machine, LinkSignal::Start);
        fail(&mut machine);
        fail(&mut machine);

        let (directive, _) = step(&mut machine, LinkSignal::Rearm);
        assert!(directive.attach.is_some());
        assert_eq!(machine.state(), LinkState::Attaching);
        assert_eq!(machine.attempt().attempt_count, 0);
        assert!(!machine.is_exhausted());
    }

    #[test]
    fn test_rearm_ignored_when_not_exhausted() {
        let mut machine = LinkMachine::new(3);
        step(&mut machine, LinkSignal::Start);
        let (directive, _) = step(&mut machine, LinkSignal::Rearm);
        assert!(!directive.attach.is_some());
    }

    #[test]
    fn test_result_without_attach_ignored() {
        let mut machine = LinkMachine::new(3);
        let (_, events) = step(&mut machine, LinkSignal::AttachSucceeded(AttachTicket(1)));
        assert!(events.is_empty());
        assert_eq!(machine.state(), LinkState::Idle);
    }

    #[test]
    fn test_superseded_attach_result_is_dropped() {
        let mut machine = LinkMachine::new(1);
        let (directive, _) = step(&mut machine, LinkSignal::Start);
        let first = directive.attach.unwrap();

        // An association failure reported as a disconnect settles the first
        // attempt while its attach call is still running
        let (directive, _) = step(
            &mut machine,
            LinkSignal::Disconnected("association rejected".into()),
        );
        let second = directive.attach.unwrap();
        assert_ne!(first, second);

        // The first call fails late; it must not consume the retry
        let (directive, events) =
            step(&mut machine, LinkSignal::AttachFailed(first, "timeout".into()));
        assert_eq!(directive, LinkDirective::default());
        assert!(events.is_empty());
        assert!(!machine.is_exhausted());
        assert_eq!(machine.pending_attach(), Some(second));

        let (_, events) = step(&mut machine, LinkSignal::AttachSucceeded(second));
        assert_eq!(events, vec![LinkEvent::Up]);
        assert_eq!(machine.state(), LinkState::Attached);
    }

    #[test]
    fn test_late_success_of_superseded_attach_ignored() {
        let mut machine = LinkMachine::new(3);
        let (directive, _) = step(&mut machine, LinkSignal::Start);
        let first = directive.attach.unwrap();
        step(&mut machine, LinkSignal::Disconnected("association rejected".into()));

        let (_, events) = step(&mut machine, LinkSignal::AttachSucceeded(first));
        assert!(events.is_empty());
        assert_eq!(machine.state(), LinkState::Backoff);
        assert!(machine.attach_in_flight());
    }

    proptest! {
        #[test]
        fn retries_exactly_max_attempts_after_losing_link(
            max_attempts in 1u32..12,
            disconnect_style in proptest::collection::vec(any::<bool>(), 0..40),
        ) {
            let mut machine = LinkMachine::new(max_attempts);
            step(&mut machine, LinkSignal::Start);
            succeed(&mut machine);

            let mut attaches_issued = 0u32;
            let mut failed_events = 0u32;
            let styles = std::iter::once(&true)
                .chain(disconnect_style.iter())
                .chain(std::iter::repeat(&true).take(max_attempts as usize + 3));

            for as_disconnect in styles {
                let signal = match (as_disconnect, machine.pending_attach()) {
                    (false, Some(ticket)) => LinkSignal::AttachFailed(ticket, "timeout".into()),
                    // Once nothing is in flight, a failure report is stale
                    (false, None) => LinkSignal::AttachFailed(AttachTicket(0), "timeout".into()),
                    (true, _) => LinkSignal::Disconnected("assoc failed".into()),
                };
                let (directive, events) = step(&mut machine, signal);
                if directive.attach.is_some() {
                    attaches_issued += 1;
                }
                failed_events += events
                    .iter()
                    .filter(|e| matches!(e, LinkEvent::Failed { .. }))
                    .count() as u32;
                prop_assert!(machine.attempt().attempt_count <= max_attempts);
            }

            prop_assert_eq!(attaches_issued, max_attempts);
            prop_assert_eq!(failed_events, 1);
            prop_assert!(machine.is_exhausted());
            prop_assert_eq!(machine.state(), LinkState::Backoff);
        }
    }
}
