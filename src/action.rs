//! Single-slot pending-action register
//!
//! The inbound message path writes the latest requested action, the actuator
//! consumes it. Writes coalesce: several requests arriving before the
//! actuator looks collapse into one. A [`Notify`] wakes the consumer so it
//! does not poll.

use crate::protocol::ActionKind;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
    pending: Option<ActionKind>,
    writes: u64,
}

/// Latest-value register between the session and the actuator
#[derive(Debug, Default)]
pub struct ActionChannel {
    slot: Mutex<Slot>,
    wake: Notify,
}

impl ActionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a requested action, overwriting any pending one
    pub fn set_action(&self, kind: ActionKind) {
        {
            let mut slot = self.lock();
            if slot.pending.is_some() {
                debug!(?kind, "Coalescing with pending action");
            }
            slot.pending = Some(kind);
            slot.writes += 1;
        }
        self.wake.notify_one();
    }

    /// Atomically read and clear the pending action
    pub fn take_action(&self) -> Option<ActionKind> {
        self.lock().pending.take()
    }

    /// Whether an action is waiting to be taken
    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Total writes since creation, coalesced ones included
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Wait until an action is pending, then take it
    pub async fn wait_action(&self) -> ActionKind {
        loop {
            if let Some(kind) = self.take_action() {
                return kind;
            }
            // A set between the take above and this await leaves a stored
            // permit, so the wakeup is not lost.
            self.wake.notified().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
