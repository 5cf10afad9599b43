//! Testing utilities and mock implementations
//!
//! Mock capabilities for exercising the supervisors without a radio, a
//! broker or GPIO.

pub mod mocks;

pub use mocks::*;
