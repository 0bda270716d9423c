//! Generic `Servo` trait for one position-controlled joint.
//!
//! Drivers implement this trait and register themselves with a
//! [`ServoBus`][crate::bus::ServoBus], which presents the whole robot to the
//! control loop as a single [`JointBus`][crate::bus::JointBus].

use loco_types::{LocoError, PidGains};

/// A position-controlled joint actuator.
///
/// Every servo has a stable string identifier matching one of the native
/// joint names (e.g. `"left_knee"`), which the bus uses to route targets.
/// Reads take `&mut self` because on real hardware they are bus
/// transactions.
pub trait Servo: Send {
    /// Stable joint identifier.
    fn id(&self) -> &str;

    /// Energise the motor (torque on).
    fn enable(&mut self) -> Result<(), LocoError>;

    /// Update the servo's internal position-loop gains.
    fn set_gains(&mut self, gains: PidGains) -> Result<(), LocoError>;

    /// Command the joint to `target_rad` (radians from its zero position).
    ///
    /// # Errors
    ///
    /// Returns [`LocoError::HardwareFault`] if the command cannot be applied.
    fn set_goal_position(&mut self, target_rad: f32) -> Result<(), LocoError>;

    /// Present position in radians.
    fn present_position(&mut self) -> Result<f32, LocoError>;

    /// Present velocity in rad/s.
    fn present_velocity(&mut self) -> Result<f32, LocoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process servo used only for tests.
    struct MockServo {
        id: String,
        position: f32,
        enabled: bool,
    }

    impl Servo for MockServo {
        fn id(&self) -> &str {
            &self.id
        }

        fn enable(&mut self) -> Result<(), LocoError> {
            self.enabled = true;
            Ok(())
        }

        fn set_gains(&mut self, _gains: PidGains) -> Result<(), LocoError> {
            Ok(())
        }

        fn set_goal_position(&mut self, target_rad: f32) -> Result<(), LocoError> {
            if !self.enabled {
                return Err(LocoError::HardwareFault {
                    component: self.id.clone(),
                    details: "torque is off".to_string(),
                });
            }
            self.position = target_rad;
            Ok(())
        }

        fn present_position(&mut self) -> Result<f32, LocoError> {
            Ok(self.position)
        }

        fn present_velocity(&mut self) -> Result<f32, LocoError> {
            Ok(0.0)
        }
    }

    #[test]
    fn mock_servo_requires_enable_before_moving() {
        let mut servo = MockServo {
            id: "left_knee".to_string(),
            position: 0.0,
            enabled: false,
        };
        assert!(servo.set_goal_position(1.0).is_err());

        servo.enable().unwrap();
        servo.set_goal_position(std::f32::consts::FRAC_PI_2).unwrap();
        let pos = servo.present_position().unwrap();
        assert!((pos - std::f32::consts::FRAC_PI_2).abs() < f32::EPSILON);
    }
}
