//! `loco-types` – shared vocabulary of the locomotion controller.
//!
//! # Modules
//!
//! - [`joints`] – the fixed joint layout, the order-tagged
//!   [`JointVector`][joints::JointVector], and the coordinate mapper that
//!   converts between the hardware ("native") and policy joint orders.

pub mod joints;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use joints::{JointVector, Native, Policy, NUM_ACTUATED, NUM_JOINTS};

/// Desired base velocity supplied by the command source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Forward velocity (m/s).
    pub forward: f32,
    /// Lateral velocity (m/s), positive to the left.
    pub lateral: f32,
    /// Yaw rate (rad/s), counter-clockwise positive.
    pub yaw_rate: f32,
}

impl Command {
    pub fn new(forward: f32, lateral: f32, yaw_rate: f32) -> Self {
        Self {
            forward,
            lateral,
            yaw_rate,
        }
    }

    /// The zero command (stand still).
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.forward, self.lateral, self.yaw_rate]
    }

    /// Multiply each axis by its gain (`[forward, lateral, yaw]`).
    pub fn scaled(self, gains: [f32; 3]) -> Self {
        Self::new(
            self.forward * gains[0],
            self.lateral * gains[1],
            self.yaw_rate * gains[2],
        )
    }
}

/// Position-loop gains pushed to every servo at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

impl PidGains {
    pub fn new(p: f32, i: f32, d: f32) -> Self {
        Self { p, i, d }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self::new(1000.0, 0.0, 500.0)
    }
}

/// Error type shared by every layer of the controller.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocoError {
    #[error("No orientation has been published yet")]
    NoOrientation,

    #[error("Orientation is stale: last sample is {age_ms} ms old")]
    StaleOrientation { age_ms: u64 },

    #[error("Quaternion has zero or non-finite norm")]
    InvalidQuaternion,

    #[error("Orientation sensor read failed: {0}")]
    SensorRead(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("{context}: expected length {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Session persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LocoError {
    /// Build a [`LocoError::DimensionMismatch`] for `context`.
    pub fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Period of a loop running at `hz`.
///
/// # Errors
///
/// [`LocoError::Config`] if `hz` is not positive or its period does not fit
/// in a [`Duration`].
pub fn period_from_hz(hz: f32) -> Result<Duration, LocoError> {
    if !(hz.is_finite() && hz > 0.0) {
        return Err(LocoError::Config(format!("frequency must be positive, got {hz} Hz")));
    }
    Duration::try_from_secs_f32(1.0 / hz)
        .map_err(|e| LocoError::Config(format!("frequency {hz} Hz has no usable period: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_from_hz_inverts_frequency() {
        let period = period_from_hz(50.0).unwrap();
        assert!((period.as_secs_f32() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn period_from_hz_rejects_unrepresentable_periods() {
        assert!(matches!(period_from_hz(1e-20), Err(LocoError::Config(_))));
        assert!(matches!(period_from_hz(f32::MIN_POSITIVE / 4.0), Err(LocoError::Config(_))));
        assert!(period_from_hz(0.0).is_err());
        assert!(period_from_hz(-30.0).is_err());
        assert!(period_from_hz(f32::NAN).is_err());
    }

    #[test]
    fn command_scaling_is_per_axis() {
        let cmd = Command::new(1.0, -0.5, 2.0).scaled([2.0, 2.0, 0.25]);
        assert!((cmd.forward - 2.0).abs() < f32::EPSILON);
        assert!((cmd.lateral - (-1.0)).abs() < f32::EPSILON);
        assert!((cmd.yaw_rate - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_command_is_default() {
        assert_eq!(Command::zero(), Command::default());
        assert_eq!(Command::zero().to_array(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn command_serialization_roundtrip() {
        let cmd = Command::new(0.3, 0.0, -0.1);
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn loco_error_display() {
        let err = LocoError::StaleOrientation { age_ms: 420 };
        assert!(err.to_string().contains("420 ms"));

        let err = LocoError::HardwareFault {
            component: "left_knee".to_string(),
            details: "overload".to_string(),
        };
        assert!(err.to_string().contains("left_knee"));

        let err = LocoError::dimension("policy output", 15, 12);
        assert!(err.to_string().contains("expected length 15, got 12"));
    }
}
