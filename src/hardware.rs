//! Physical output pins
//!
//! The actuator drives a single digital output through [`PinDriver`]. On a
//! host there is no GPIO, so [`LogPinDriver`] records and logs the levels.

use crate::error::AgentError;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// Digital output facility
pub trait PinDriver: Send + Sync {
    fn set_level(&self, pin: u8, level: PinLevel) -> Result<(), AgentError>;
}

/// Pin driver for hosts without GPIO: logs each change and remembers the level
#[derive(Debug, Default)]
pub struct LogPinDriver {
    levels: Mutex<HashMap<u8, PinLevel>>,
}

impl LogPinDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, pin: u8) -> Option<PinLevel> {
        self.levels.lock().ok()?.get(&pin).copied()
    }
}

impl PinDriver for LogPinDriver {
    fn set_level(&self, pin: u8, level: PinLevel) -> Result<(), AgentError> {
        let mut levels = self
            .levels
            .lock()
            .map_err(|_| AgentError::internal("pin level table poisoned"))?;
        levels.insert(pin, level);
        info!(pin, ?level, "Pin level set");
        Ok(())
    }
}
