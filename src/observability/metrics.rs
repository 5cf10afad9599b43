//! Thread-safe metrics collection system
//!
//! Atomic counters for the link and session state machines, plus a
//! mutex-protected per-producer table. These counters are the only failure
//! surface of the agent beyond its log output.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Link metrics
    link_attached: AtomicBool,
    attach_attempts: AtomicU64,
    attach_failures: AtomicU64,
    link_up_events: AtomicU64,
    link_lost_events: AtomicU64,
    link_failed_events: AtomicU64,
    link_rearms: AtomicU64,
    link_up_since: AtomicU64,

    // Session metrics
    session_ready: AtomicBool,
    session_connect_attempts: AtomicU64,
    sessions_established: AtomicU64,
    session_connect_failures: AtomicU64,
    session_interruptions: AtomicU64,
    transport_errors: AtomicU64,
    messages_published: AtomicU64,
    publishes_dropped: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,

    // Command metrics
    commands_accepted: AtomicU64,
    commands_ignored: AtomicU64,
    actions_executed: AtomicU64,

    // Per-producer statistics (mutex protected for complex data)
    producer_stats: Mutex<HashMap<String, ProducerStats>>,

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            link_attached: AtomicBool::new(false),
            attach_attempts: AtomicU64::new(0),
            attach_failures: AtomicU64::new(0),
            link_up_events: AtomicU64::new(0),
            link_lost_events: AtomicU64::new(0),
            link_failed_events: AtomicU64::new(0),
            link_rearms: AtomicU64::new(0),
            link_up_since: AtomicU64::new(0),
            session_ready: AtomicBool::new(false),
            session_connect_attempts: AtomicU64::new(0),
            sessions_established: AtomicU64::new(0),
            session_connect_failures: AtomicU64::new(0),
            session_interruptions: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publishes_dropped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            commands_accepted: AtomicU64::new(0),
            commands_ignored: AtomicU64::new(0),
            actions_executed: AtomicU64::new(0),
            producer_stats: Mutex::new(HashMap::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Link metrics
    pub fn attach_attempted(&self) {
        self.attach_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attach_failed(&self) {
        self.attach_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_up(&self) {
        self.link_up_events.fetch_add(1, Ordering::Relaxed);
        self.link_attached.store(true, Ordering::Relaxed);
        self.link_up_since
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn link_lost(&self) {
        self.link_lost_events.fetch_add(1, Ordering::Relaxed);
        self.link_attached.store(false, Ordering::Relaxed);
        self.link_up_since.store(0, Ordering::Relaxed);
    }

    pub fn link_failed(&self) {
        self.link_failed_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_rearmed(&self) {
        self.link_rearms.fetch_add(1, Ordering::Relaxed);
    }

    // Session metrics
    pub fn session_connect_attempted(&self) {
        self.session_connect_attempts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_established(&self) {
        self.sessions_established.fetch_add(1, Ordering::Relaxed);
        self.session_ready.store(true, Ordering::Relaxed);
    }

    pub fn session_connect_failed(&self) {
        self.session_connect_failures
            .fetch_add(1, Ordering::Relaxed);
        self.session_ready.store(false, Ordering::Relaxed);
    }

    pub fn session_interrupted(&self) {
        self.session_interruptions.fetch_add(1, Ordering::Relaxed);
        self.session_ready.store(false, Ordering::Relaxed);
    }

    /// Non-fatal error reported by the transport of an open session
    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.session_ready.store(false, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish rejected because the session was not Ready
    pub fn publish_dropped(&self) {
        self.publishes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish accepted but the transport failed to send it
    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    // Command metrics
    pub fn command_accepted(&self) {
        self.commands_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_ignored(&self) {
        self.commands_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_executed(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    // Producer metrics
    pub fn producer_tick(&self, producer: &str, published: bool) {
        if let Ok(mut stats) = self.producer_stats.lock() {
            let entry = stats.entry(producer.to_string()).or_default();
            entry.ticks += 1;
            if published {
                entry.published += 1;
            } else {
                entry.dropped += 1;
            }
            entry.last_tick = current_timestamp();
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.attach_attempts,
            &self.attach_failures,
            &self.link_up_events,
            &self.link_lost_events,
            &self.link_failed_events,
            &self.link_rearms,
            &self.link_up_since,
            &self.session_connect_attempts,
            &self.sessions_established,
            &self.session_connect_failures,
            &self.session_interruptions,
            &self.transport_errors,
            &self.messages_published,
            &self.publishes_dropped,
            &self.publish_failures,
            &self.messages_received,
            &self.commands_accepted,
            &self.commands_ignored,
            &self.actions_executed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.link_attached.store(false, Ordering::Relaxed);
        self.session_ready.store(false, Ordering::Relaxed);
        self.started_at
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut stats) = self.producer_stats.lock() {
            stats.clear();
        }
    }

    /// Calculate how long the current link has been up (pure function)
    fn calculate_link_uptime(&self, now: u64) -> u64 {
        let since = self.link_up_since.load(Ordering::Relaxed);
        if self.link_attached.load(Ordering::Relaxed) && since > 0 {
            now.saturating_sub(since)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        let producers = self
            .producer_stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            link: LinkMetrics {
                attached: self.link_attached.load(Ordering::Relaxed),
                attach_attempts: self.attach_attempts.load(Ordering::Relaxed),
                attach_failures: self.attach_failures.load(Ordering::Relaxed),
                link_up_events: self.link_up_events.load(Ordering::Relaxed),
                link_lost_events: self.link_lost_events.load(Ordering::Relaxed),
                link_failed_events: self.link_failed_events.load(Ordering::Relaxed),
                rearms: self.link_rearms.load(Ordering::Relaxed),
                uptime_seconds: self.calculate_link_uptime(now),
            },
            session: SessionMetrics {
                ready: self.session_ready.load(Ordering::Relaxed),
                connect_attempts: self.session_connect_attempts.load(Ordering::Relaxed),
                sessions_established: self.sessions_established.load(Ordering::Relaxed),
                connect_failures: self.session_connect_failures.load(Ordering::Relaxed),
                interruptions: self.session_interruptions.load(Ordering::Relaxed),
                transport_errors: self.transport_errors.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publishes_dropped: self.publishes_dropped.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                accepted: self.commands_accepted.load(Ordering::Relaxed),
                ignored: self.commands_ignored.load(Ordering::Relaxed),
                actions_executed: self.actions_executed.load(Ordering::Relaxed),
            },
            producers,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub link: LinkMetrics,
    pub session: SessionMetrics,
    pub commands: CommandMetrics,
    pub producers: HashMap<String, ProducerStats>,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct LinkMetrics {
    pub attached: bool,
    pub attach_attempts: u64,
    pub attach_failures: u64,
    pub link_up_events: u64,
    pub link_lost_events: u64,
    pub link_failed_events: u64,
    pub rearms: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    pub ready: bool,
    pub connect_attempts: u64,
    pub sessions_established: u64,
    pub connect_failures: u64,
    pub interruptions: u64,
    pub transport_errors: u64,
    pub messages_published: u64,
    pub publishes_dropped: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
}

#[derive(Debug, Serialize)]
pub struct CommandMetrics {
    pub accepted: u64,
    pub ignored: u64,
    pub actions_executed: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProducerStats {
    pub ticks: u64,
    pub published: u64,
    pub dropped: u64,
    pub last_tick: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
