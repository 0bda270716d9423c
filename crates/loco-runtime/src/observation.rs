//! Observation assembly.
//!
//! The policy input is a flat vector built from, in order:
//!
//! | range    | content                                         |
//! |----------|-------------------------------------------------|
//! | `0..3`   | projected gravity (world down in body frame)    |
//! | `3..6`   | velocity command (forward, lateral, yaw rate)   |
//! | `6..21`  | scaled joint positions relative to rest, policy order |
//! | `21..36` | scaled joint velocities, policy order           |
//! | `36..51` | previous raw policy action, policy order        |
//!
//! [`ObservationLayout`] is the single source of truth for these offsets.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use loco_hal::JointBus;
use loco_perception::orientation::LatestOrientation;
use loco_perception::transform::{Quaternion, Vec3};
use loco_types::{Command, JointVector, LocoError, NUM_JOINTS, Native, Policy};

use crate::config::ControlConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Layout
// ─────────────────────────────────────────────────────────────────────────────

/// Offsets of each block inside an [`Observation`].
pub struct ObservationLayout;

impl ObservationLayout {
    pub const GRAVITY: Range<usize> = 0..3;
    pub const COMMAND: Range<usize> = 3..6;
    pub const DOF_POS: Range<usize> = 6..6 + NUM_JOINTS;
    pub const DOF_VEL: Range<usize> = 6 + NUM_JOINTS..6 + 2 * NUM_JOINTS;
    pub const PREV_ACTION: Range<usize> = 6 + 2 * NUM_JOINTS..6 + 3 * NUM_JOINTS;
    pub const LEN: usize = 6 + 3 * NUM_JOINTS;
}

/// Length of every observation vector.
pub const OBSERVATION_LEN: usize = ObservationLayout::LEN;

/// One policy input vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    values: [f32; OBSERVATION_LEN],
}

impl Observation {
    /// Concatenate the blocks in layout order.
    pub fn compose(
        gravity: Vec3,
        command: Command,
        dof_pos: &JointVector<Policy>,
        dof_vel: &JointVector<Policy>,
        prev_action: &JointVector<Policy>,
    ) -> Self {
        let mut values = [0.0; OBSERVATION_LEN];
        values[ObservationLayout::GRAVITY].copy_from_slice(&gravity.to_array());
        values[ObservationLayout::COMMAND].copy_from_slice(&command.to_array());
        values[ObservationLayout::DOF_POS].copy_from_slice(dof_pos.as_slice());
        values[ObservationLayout::DOF_VEL].copy_from_slice(dof_vel.as_slice());
        values[ObservationLayout::PREV_ACTION].copy_from_slice(prev_action.as_slice());
        Self { values }
    }

    pub fn zeros() -> Self {
        Self {
            values: [0.0; OBSERVATION_LEN],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn gravity(&self) -> &[f32] {
        &self.values[ObservationLayout::GRAVITY]
    }

    pub fn command(&self) -> &[f32] {
        &self.values[ObservationLayout::COMMAND]
    }

    pub fn dof_pos(&self) -> &[f32] {
        &self.values[ObservationLayout::DOF_POS]
    }

    pub fn dof_vel(&self) -> &[f32] {
        &self.values[ObservationLayout::DOF_VEL]
    }

    pub fn prev_action(&self) -> &[f32] {
        &self.values[ObservationLayout::PREV_ACTION]
    }
}

/// World down direction expressed in the body frame of `orientation`.
pub fn projected_gravity(orientation: Quaternion) -> Vec3 {
    orientation.rotate_inverse(Vec3::down())
}

// ─────────────────────────────────────────────────────────────────────────────
// Assembler
// ─────────────────────────────────────────────────────────────────────────────

/// Builds observations from the shared orientation cell and joint telemetry.
pub struct ObservationAssembler {
    orientation: Arc<LatestOrientation>,
    rest_pose: JointVector<Native>,
    dof_pos_scale: f32,
    dof_vel_scale: f32,
    max_orientation_age: Option<Duration>,
}

impl ObservationAssembler {
    pub fn new(config: &ControlConfig, orientation: Arc<LatestOrientation>) -> Self {
        Self {
            orientation,
            rest_pose: config.rest_pose_native(),
            dof_pos_scale: config.dof_pos_scale,
            dof_vel_scale: config.dof_vel_scale,
            max_orientation_age: config.max_orientation_age(),
        }
    }

    /// Assemble one observation.
    ///
    /// The orientation is checked first, so a missing or stale sample fails
    /// before any joint I/O happens.
    ///
    /// # Errors
    ///
    /// - [`LocoError::NoOrientation`] if the sampler has never published.
    /// - [`LocoError::StaleOrientation`] if the latest sample is too old.
    /// - Any error from the joint bus reads.
    pub fn assemble<B: JointBus + ?Sized>(
        &self,
        bus: &mut B,
        command: Command,
        prev_action: &JointVector<Policy>,
    ) -> Result<Observation, LocoError> {
        let orientation = self.orientation.fresh(self.max_orientation_age)?;
        let gravity = projected_gravity(orientation);

        let positions = bus.positions()?;
        let velocities = bus.velocities()?;

        let dof_pos = positions
            .sub(self.rest_pose)
            .scale(self.dof_pos_scale)
            .without_placeholders()
            .to_policy();
        let dof_vel = velocities
            .scale(self.dof_vel_scale)
            .without_placeholders()
            .to_policy();

        Ok(Observation::compose(gravity, command, &dof_pos, &dof_vel, prev_action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loco_hal::sim::SimBus;
    use std::f32::consts::FRAC_PI_2;

    fn config() -> ControlConfig {
        ControlConfig {
            max_orientation_age_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn layout_is_contiguous() {
        assert_eq!(ObservationLayout::GRAVITY.end, ObservationLayout::COMMAND.start);
        assert_eq!(ObservationLayout::COMMAND.end, ObservationLayout::DOF_POS.start);
        assert_eq!(ObservationLayout::DOF_POS.end, ObservationLayout::DOF_VEL.start);
        assert_eq!(ObservationLayout::DOF_VEL.end, ObservationLayout::PREV_ACTION.start);
        assert_eq!(ObservationLayout::PREV_ACTION.end, OBSERVATION_LEN);
        assert_eq!(OBSERVATION_LEN, 51);
    }

    #[test]
    fn never_published_orientation_fails_before_io() {
        let cfg = config();
        let assembler = ObservationAssembler::new(&cfg, Arc::new(LatestOrientation::new()));
        // An empty bus would fail with HardwareFault if it were read.
        let mut bus = loco_hal::ServoBus::new();
        let err = assembler
            .assemble(&mut bus, Command::zero(), &JointVector::zeros())
            .unwrap_err();
        assert_eq!(err, LocoError::NoOrientation);
    }

    #[test]
    fn rest_pose_at_identity_gives_canonical_observation() {
        let cfg = config();
        let cell = Arc::new(LatestOrientation::new());
        cell.publish(Quaternion::identity());
        let assembler = ObservationAssembler::new(&cfg, cell);
        let mut bus = SimBus::new().with_pose(cfg.rest_pose).build();

        let obs = assembler
            .assemble(&mut bus, Command::zero(), &JointVector::zeros())
            .unwrap();
        assert_eq!(obs.as_slice().len(), OBSERVATION_LEN);
        assert_eq!(obs.gravity(), &[0.0, 0.0, -1.0]);
        assert!(obs.dof_pos().iter().all(|v| v.abs() < 1e-6));
        assert!(obs.dof_vel().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn length_is_fixed_for_any_command() {
        let cfg = config();
        let cell = Arc::new(LatestOrientation::new());
        cell.publish(Quaternion::identity());
        let assembler = ObservationAssembler::new(&cfg, cell);
        let mut bus = SimBus::new().build();
        for cmd in [Command::zero(), Command::new(1e6, -3.0, 0.5), Command::new(f32::MAX, 0.0, 0.0)] {
            let obs = assembler.assemble(&mut bus, cmd, &JointVector::zeros()).unwrap();
            assert_eq!(obs.as_slice().len(), OBSERVATION_LEN);
            assert_eq!(obs.command()[0], cmd.forward);
        }
    }

    #[test]
    fn joint_blocks_are_scaled_and_in_policy_order() {
        let cfg = config();
        let cell = Arc::new(LatestOrientation::new());
        cell.publish(Quaternion::identity());
        let assembler = ObservationAssembler::new(&cfg, cell);

        let mut pose = cfg.rest_pose;
        pose[3] += 0.2; // right_knee, native index 3
        let mut bus = SimBus::new().with_pose(pose).with_velocity(2.0).build();
        let prev = JointVector::<Policy>::from_fn(|i| i as f32);

        let obs = assembler.assemble(&mut bus, Command::zero(), &prev).unwrap();

        // right_knee sits at policy index 13.
        assert!((obs.dof_pos()[13] - 0.2).abs() < 1e-5);
        assert!(obs.dof_pos()[3].abs() < 1e-6);
        // Velocities scaled by 0.05; the antenna placeholders (policy 8, 9) stay zero.
        assert!((obs.dof_vel()[0] - 0.1).abs() < 1e-6);
        assert_eq!(obs.dof_vel()[8], 0.0);
        assert_eq!(obs.dof_vel()[9], 0.0);
        assert_eq!(obs.prev_action(), prev.as_slice());
    }

    #[test]
    fn pitched_body_sees_gravity_along_x() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), FRAC_PI_2);
        let g = projected_gravity(q);
        assert!((g.x - 1.0).abs() < 1e-5);
        assert!(g.z.abs() < 1e-5);
    }
}
