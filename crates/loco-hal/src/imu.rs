//! Absolute orientation sensor interface.
//!
//! A driver reports the sensor's fused orientation as a raw quaternion.
//! Reads are allowed to fail transiently (bus glitches, checksum errors);
//! callers are expected to retry rather than give up.

use loco_types::LocoError;

/// Raw quaternion as reported by the sensor, scalar first.
///
/// Not guaranteed to be exactly unit-norm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuaternionReading {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl QuaternionReading {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }
}

/// An orientation sensor (e.g. a 9-DoF IMU running on-chip fusion).
pub trait OrientationSensor: Send {
    /// Read the current orientation.
    ///
    /// # Errors
    ///
    /// Returns [`LocoError::SensorRead`] on a transient read failure.
    fn read_quaternion(&mut self) -> Result<QuaternionReading, LocoError>;
}

impl<S: OrientationSensor + ?Sized> OrientationSensor for Box<S> {
    fn read_quaternion(&mut self) -> Result<QuaternionReading, LocoError> {
        (**self).read_quaternion()
    }
}
