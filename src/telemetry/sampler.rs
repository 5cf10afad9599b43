//! Measurement sources for telemetry producers

use crate::config::{SampleSource, TelemetrySection};
use serde_json::Value;

/// Produces one reading per producer tick
pub trait Sampler: Send {
    fn sample(&mut self) -> Value;
}

/// Deterministic pseudo-random readings in `0..100`.
///
/// Linear congruential generator over 31 bits, so a given seed always
/// yields the same sequence.
#[derive(Debug, Clone)]
pub struct SyntheticSampler {
    state: u32,
}

impl SyntheticSampler {
    pub const DEFAULT_SEED: u32 = 123_456_789;

    const MULTIPLIER: u32 = 1_103_515_245;
    const INCREMENT: u32 = 12_345;
    const MASK: u32 = 0x7FFF_FFFF;

    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_value(&mut self) -> u32 {
        self.state = Self::MULTIPLIER
            .wrapping_mul(self.state)
            .wrapping_add(Self::INCREMENT)
            & Self::MASK;
        self.state % 100
    }
}

impl Default for SyntheticSampler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

impl Sampler for SyntheticSampler {
    fn sample(&mut self) -> Value {
        Value::from(self.next_value())
    }
}

/// Build the sampler a telemetry section asks for
pub fn sampler_for(section: &TelemetrySection) -> Box<dyn Sampler> {
    match section.source {
        SampleSource::Synthetic => Box::new(SyntheticSampler::new(
            section.seed.unwrap_or(SyntheticSampler::DEFAULT_SEED),
        )),
    }
}
