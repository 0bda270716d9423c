//! [`JointBus`] – whole-robot joint interface, and [`ServoBus`], the servo
//! registry that implements it.
//!
//! The control loop sees the robot as one bus: enable everything, set gains
//! everywhere, read all positions/velocities in native order, and send a
//! `joint-name → angle` target map.  [`ServoBus`] resolves each joint name to
//! a registered [`Servo`] driver and reports a
//! [`LocoError::HardwareFault`] for any joint that has no driver.

use std::collections::{BTreeMap, HashMap};

use loco_types::joints::NATIVE_JOINT_NAMES;
use loco_types::{JointVector, LocoError, NUM_ACTUATED, Native, PidGains};
use tracing::{debug, info};

use crate::servo::Servo;

/// Whole-robot joint interface, native order.
pub trait JointBus: Send {
    /// Torque on for every joint.
    fn enable(&mut self) -> Result<(), LocoError>;

    /// Push the same position-loop gains to every joint.
    fn set_gains(&mut self, gains: PidGains) -> Result<(), LocoError>;

    /// Present positions (rad).  Placeholder joints read as zero.
    fn positions(&mut self) -> Result<JointVector<Native>, LocoError>;

    /// Present velocities (rad/s).  Placeholder joints read as zero.
    fn velocities(&mut self) -> Result<JointVector<Native>, LocoError>;

    /// Send a `joint-name → target angle` map.
    fn set_target_positions(&mut self, targets: &BTreeMap<&'static str, f32>) -> Result<(), LocoError>;
}

/// Registry of per-joint [`Servo`] drivers presented as a [`JointBus`].
///
/// Construct with [`ServoBus::new`], register one driver per actuated joint,
/// then hand the bus to the control loop.
#[derive(Default)]
pub struct ServoBus {
    servos: HashMap<String, Box<dyn Servo>>,
    enabled: bool,
    gains: Option<PidGains>,
    last_targets: Option<BTreeMap<String, f32>>,
    commands_sent: u64,
}

impl ServoBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a servo driver.  Any previously registered driver with the
    /// same `id` is replaced.
    pub fn register(&mut self, servo: Box<dyn Servo>) {
        self.servos.insert(servo.id().to_string(), servo);
    }

    pub fn len(&self) -> usize {
        self.servos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servos.is_empty()
    }

    /// `true` once [`JointBus::enable`] has succeeded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Gains most recently pushed with [`JointBus::set_gains`].
    pub fn gains(&self) -> Option<PidGains> {
        self.gains
    }

    /// The last target map sent with [`JointBus::set_target_positions`].
    pub fn last_targets(&self) -> Option<&BTreeMap<String, f32>> {
        self.last_targets.as_ref()
    }

    /// Number of successful target commands.
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    fn servo_mut(&mut self, id: &str) -> Result<&mut Box<dyn Servo>, LocoError> {
        self.servos.get_mut(id).ok_or_else(|| LocoError::HardwareFault {
            component: id.to_string(),
            details: format!("servo '{id}' is not registered"),
        })
    }

    fn read_all(
        &mut self,
        mut read: impl FnMut(&mut Box<dyn Servo>) -> Result<f32, LocoError>,
    ) -> Result<JointVector<Native>, LocoError> {
        let mut actuated = [0.0; NUM_ACTUATED];
        for (slot, name) in actuated.iter_mut().zip(NATIVE_JOINT_NAMES.iter()) {
            *slot = read(self.servo_mut(name)?)?;
        }
        Ok(JointVector::from_actuated(&actuated))
    }
}

impl JointBus for ServoBus {
    fn enable(&mut self) -> Result<(), LocoError> {
        for name in &NATIVE_JOINT_NAMES[..NUM_ACTUATED] {
            self.servo_mut(name)?.enable()?;
        }
        self.enabled = true;
        info!(servos = self.servos.len(), "servo bus enabled");
        Ok(())
    }

    fn set_gains(&mut self, gains: PidGains) -> Result<(), LocoError> {
        for name in &NATIVE_JOINT_NAMES[..NUM_ACTUATED] {
            self.servo_mut(name)?.set_gains(gains)?;
        }
        self.gains = Some(gains);
        info!(p = gains.p, i = gains.i, d = gains.d, "servo gains set");
        Ok(())
    }

    fn positions(&mut self) -> Result<JointVector<Native>, LocoError> {
        self.read_all(|s| s.present_position())
    }

    fn velocities(&mut self) -> Result<JointVector<Native>, LocoError> {
        self.read_all(|s| s.present_velocity())
    }

    fn set_target_positions(&mut self, targets: &BTreeMap<&'static str, f32>) -> Result<(), LocoError> {
        for (name, target) in targets {
            self.servo_mut(name)?.set_goal_position(*target)?;
        }
        self.last_targets = Some(targets.iter().map(|(k, v)| (k.to_string(), *v)).collect());
        self.commands_sent += 1;
        debug!(joints = targets.len(), "targets sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimServo;

    fn full_bus() -> ServoBus {
        let mut bus = ServoBus::new();
        for (i, name) in NATIVE_JOINT_NAMES[..NUM_ACTUATED].iter().enumerate() {
            bus.register(SimServo::new(*name, i as f32 * 0.1));
        }
        bus
    }

    #[test]
    fn positions_are_reported_in_native_order() {
        let mut bus = full_bus();
        let pos = bus.positions().unwrap();
        for i in 0..NUM_ACTUATED {
            assert!((pos[i] - i as f32 * 0.1).abs() < 1e-6);
        }
        assert_eq!(pos.get("left_antenna"), Some(0.0));
        assert_eq!(pos.get("right_antenna"), Some(0.0));
    }

    #[test]
    fn enable_and_gains_reach_every_servo() {
        let mut bus = full_bus();
        assert!(!bus.is_enabled());
        bus.enable().unwrap();
        bus.set_gains(PidGains::new(800.0, 0.0, 300.0)).unwrap();
        assert!(bus.is_enabled());
        assert_eq!(bus.gains(), Some(PidGains::new(800.0, 0.0, 300.0)));
    }

    #[test]
    fn targets_move_registered_servos() {
        let mut bus = full_bus();
        bus.enable().unwrap();
        let mut targets = BTreeMap::new();
        targets.insert("left_knee", -1.2);
        bus.set_target_positions(&targets).unwrap();

        let pos = bus.positions().unwrap();
        assert!((pos.get("left_knee").unwrap() - (-1.2)).abs() < f32::EPSILON);
        assert_eq!(bus.commands_sent(), 1);
        assert_eq!(bus.last_targets().unwrap()["left_knee"], -1.2);
    }

    #[test]
    fn missing_servo_is_a_hardware_fault() {
        let mut bus = ServoBus::new();
        bus.register(SimServo::new("right_hip_yaw", 0.0));
        let err = bus.positions().unwrap_err();
        assert!(matches!(err, LocoError::HardwareFault { .. }));

        let mut targets = BTreeMap::new();
        targets.insert("neck_pitch", 0.1);
        assert!(matches!(
            bus.set_target_positions(&targets),
            Err(LocoError::HardwareFault { .. })
        ));
    }

    #[test]
    fn re_registering_replaces_old_driver() {
        let mut bus = full_bus();
        bus.register(SimServo::new("head_yaw", 3.0));
        let pos = bus.positions().unwrap();
        assert!((pos.get("head_yaw").unwrap() - 3.0).abs() < f32::EPSILON);
        assert_eq!(bus.len(), NUM_ACTUATED);
    }
}
