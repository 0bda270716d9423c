//! In-process simulated drivers for headless runs and CI.
//!
//! [`SimBus`] builds a [`ServoBus`] populated with [`SimServo`] drivers for
//! every actuated joint, and [`SimImu`] stands in for the orientation sensor.
//! Together they let the full control stack run without any hardware.
//!
//! # Example
//!
//! ```rust
//! use loco_hal::bus::JointBus;
//! use loco_hal::sim::SimBus;
//! use loco_types::NUM_ACTUATED;
//!
//! let mut bus = SimBus::new().with_pose([0.1; NUM_ACTUATED]).build();
//! bus.enable().expect("sim enable must succeed");
//! let pos = bus.positions().expect("sim read must succeed");
//! assert!((pos[0] - 0.1).abs() < 1e-6);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use loco_types::joints::NATIVE_JOINT_NAMES;
use loco_types::{LocoError, NUM_ACTUATED, PidGains};

use crate::bus::ServoBus;
use crate::imu::{OrientationSensor, QuaternionReading};
use crate::servo::Servo;

// ────────────────────────────────────────────────────────────────────────────
// Stub servo
// ────────────────────────────────────────────────────────────────────────────

/// A simulated servo that reaches its goal instantly and reports a fixed
/// velocity.  Always succeeds.
pub struct SimServo {
    id: String,
    position: f32,
    velocity: f32,
    enabled: bool,
    gains: Option<PidGains>,
}

impl SimServo {
    /// Create a simulated servo resting at `position`.
    pub fn new(id: impl Into<String>, position: f32) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            position,
            velocity: 0.0,
            enabled: false,
            gains: None,
        })
    }

    /// Report `velocity` from every velocity read.
    pub fn with_velocity(mut self: Box<Self>, velocity: f32) -> Box<Self> {
        self.velocity = velocity;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn gains(&self) -> Option<PidGains> {
        self.gains
    }
}

impl Servo for SimServo {
    fn id(&self) -> &str {
        &self.id
    }

    fn enable(&mut self) -> Result<(), LocoError> {
        self.enabled = true;
        Ok(())
    }

    fn set_gains(&mut self, gains: PidGains) -> Result<(), LocoError> {
        self.gains = Some(gains);
        Ok(())
    }

    fn set_goal_position(&mut self, target_rad: f32) -> Result<(), LocoError> {
        self.position = target_rad;
        Ok(())
    }

    fn present_position(&mut self) -> Result<f32, LocoError> {
        Ok(self.position)
    }

    fn present_velocity(&mut self) -> Result<f32, LocoError> {
        Ok(self.velocity)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub IMU
// ────────────────────────────────────────────────────────────────────────────

/// A simulated orientation sensor returning a fixed quaternion.
///
/// Transient failures can be injected with [`SimImu::with_failure_every`].
pub struct SimImu {
    reading: QuaternionReading,
    fail_every: Option<u64>,
    reads: Arc<AtomicU64>,
}

impl SimImu {
    /// A level, motionless sensor.
    pub fn new() -> Self {
        Self::with_reading(QuaternionReading::identity())
    }

    pub fn with_reading(reading: QuaternionReading) -> Self {
        Self {
            reading,
            fail_every: None,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fail every `n`-th read (`n = 1` fails every read).
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Shared counter of read attempts, usable after the sensor has been
    /// moved into a sampler thread.
    pub fn read_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.reads)
    }
}

impl Default for SimImu {
    fn default() -> Self {
        Self::new()
    }
}

impl OrientationSensor for SimImu {
    fn read_quaternion(&mut self) -> Result<QuaternionReading, LocoError> {
        let n = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        match self.fail_every {
            Some(every) if n % every == 0 => Err(LocoError::SensorRead(format!(
                "simulated transient failure on read {n}"
            ))),
            _ => Ok(self.reading),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimBus builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder that constructs a [`ServoBus`] pre-populated with [`SimServo`]
/// drivers for every actuated joint.
#[derive(Default)]
pub struct SimBus {
    pose: [f32; NUM_ACTUATED],
    velocity: f32,
    overrides: Vec<Box<dyn Servo>>,
}

impl SimBus {
    /// All joints at zero, zero velocity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every joint at `pose` (native order, actuated joints only).
    pub fn with_pose(mut self, pose: [f32; NUM_ACTUATED]) -> Self {
        self.pose = pose;
        self
    }

    /// Report `velocity` from every joint.
    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    /// Replace one joint's driver, e.g. with a tracking test double.
    pub fn with_servo(mut self, servo: Box<dyn Servo>) -> Self {
        self.overrides.push(servo);
        self
    }

    /// Consume the builder and return the populated [`ServoBus`].
    pub fn build(self) -> ServoBus {
        let mut bus = ServoBus::new();
        for (name, pos) in NATIVE_JOINT_NAMES.iter().zip(self.pose) {
            bus.register(SimServo::new(*name, pos).with_velocity(self.velocity));
        }
        for servo in self.overrides {
            bus.register(servo);
        }
        bus
    }
}
