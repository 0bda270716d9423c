//! [`ControlConfig`] – the one explicit context object every runtime
//! component is built from.
//!
//! Loaded once at startup (normally from the `[control]` table of the CLI
//! config file) and never re-read.  Every field has a serde default, so a
//! partial table only overrides what it names.

use std::time::Duration;

use loco_perception::sampler::{AxisCorrection, SamplerConfig};
use loco_types::{JointVector, LocoError, NUM_ACTUATED, Native, PidGains, Policy};
use serde::{Deserialize, Serialize};

/// Runtime tuning for one control session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Target loop frequency (Hz).
    #[serde(default = "default_control_frequency_hz")]
    pub control_frequency_hz: f32,

    /// Multiplier applied to the raw policy output before the rest-pose
    /// offset is added.
    #[serde(default = "default_action_scale")]
    pub action_scale: f32,

    /// Action filter cutoff (Hz).
    #[serde(default = "default_cutoff_frequency_hz")]
    pub cutoff_frequency_hz: f32,

    /// Pitch calibration bias for the orientation sensor (degrees).
    #[serde(default)]
    pub pitch_bias_deg: f32,

    #[serde(default = "default_dof_pos_scale")]
    pub dof_pos_scale: f32,

    #[serde(default = "default_dof_vel_scale")]
    pub dof_vel_scale: f32,

    /// Gain on forward and lateral command velocity.
    #[serde(default = "default_linear_velocity_scale")]
    pub linear_velocity_scale: f32,

    /// Gain on commanded yaw rate.
    #[serde(default = "default_angular_velocity_scale")]
    pub angular_velocity_scale: f32,

    /// Wait between enabling the servos and the first iteration (ms).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Oldest orientation sample the loop will act on (ms).  `0` disables
    /// the check.
    #[serde(default = "default_max_orientation_age_ms")]
    pub max_orientation_age_ms: u64,

    /// Observation window length fed to the adaptation module.
    #[serde(default = "default_observation_history_len")]
    pub observation_history_len: usize,

    /// Calibrated home pose of the actuated joints, native order (rad).
    #[serde(default = "default_rest_pose")]
    pub rest_pose: [f32; NUM_ACTUATED],

    /// Sensor Euler axis feeding each robot Euler axis.
    #[serde(default = "default_orientation_axis_order")]
    pub orientation_axis_order: [usize; 3],

    /// Robot Euler axis that receives `pitch_bias_deg`.
    #[serde(default = "default_pitch_axis")]
    pub pitch_axis: usize,

    /// Position-loop gains pushed to every servo on start.  Kept last so
    /// it serialises as a trailing TOML table.
    #[serde(default)]
    pub pid: PidGains,
}

fn default_control_frequency_hz() -> f32 {
    30.0
}
fn default_action_scale() -> f32 {
    0.25
}
fn default_cutoff_frequency_hz() -> f32 {
    10.0
}
fn default_dof_pos_scale() -> f32 {
    1.0
}
fn default_dof_vel_scale() -> f32 {
    0.05
}
fn default_linear_velocity_scale() -> f32 {
    2.0
}
fn default_angular_velocity_scale() -> f32 {
    0.25
}
fn default_settle_delay_ms() -> u64 {
    2000
}
fn default_max_orientation_age_ms() -> u64 {
    250
}
fn default_observation_history_len() -> usize {
    15
}
fn default_rest_pose() -> [f32; NUM_ACTUATED] {
    [
        0.0, 0.0, 0.6, -1.2, 0.6, // right leg
        0.0, 0.0, 0.6, -1.2, 0.6, // left leg
        -0.15, 0.0, 0.0, // head
    ]
}
fn default_orientation_axis_order() -> [usize; 3] {
    [1, 2, 0]
}
fn default_pitch_axis() -> usize {
    1
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            control_frequency_hz: default_control_frequency_hz(),
            action_scale: default_action_scale(),
            cutoff_frequency_hz: default_cutoff_frequency_hz(),
            pitch_bias_deg: 0.0,
            dof_pos_scale: default_dof_pos_scale(),
            dof_vel_scale: default_dof_vel_scale(),
            linear_velocity_scale: default_linear_velocity_scale(),
            angular_velocity_scale: default_angular_velocity_scale(),
            settle_delay_ms: default_settle_delay_ms(),
            max_orientation_age_ms: default_max_orientation_age_ms(),
            observation_history_len: default_observation_history_len(),
            rest_pose: default_rest_pose(),
            orientation_axis_order: default_orientation_axis_order(),
            pitch_axis: default_pitch_axis(),
            pid: PidGains::default(),
        }
    }
}

impl ControlConfig {
    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), LocoError> {
        self.period()?;
        if !(self.cutoff_frequency_hz.is_finite() && self.cutoff_frequency_hz > 0.0) {
            return Err(LocoError::Config(format!(
                "cutoff_frequency_hz must be positive, got {}",
                self.cutoff_frequency_hz
            )));
        }
        if self.observation_history_len == 0 {
            return Err(LocoError::Config("observation_history_len must be at least 1".into()));
        }
        let scalars = [
            ("action_scale", self.action_scale),
            ("pitch_bias_deg", self.pitch_bias_deg),
            ("dof_pos_scale", self.dof_pos_scale),
            ("dof_vel_scale", self.dof_vel_scale),
            ("linear_velocity_scale", self.linear_velocity_scale),
            ("angular_velocity_scale", self.angular_velocity_scale),
        ];
        if let Some((name, _)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Err(LocoError::Config(format!("{name} must be finite")));
        }
        if self.rest_pose.iter().any(|v| !v.is_finite()) {
            return Err(LocoError::Config("rest_pose must be finite".into()));
        }
        self.sampler_config()?;
        Ok(())
    }

    /// Target loop period.
    pub fn period(&self) -> Result<Duration, LocoError> {
        loco_types::period_from_hz(self.control_frequency_hz)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Staleness bound for orientation samples, `None` when disabled.
    pub fn max_orientation_age(&self) -> Option<Duration> {
        (self.max_orientation_age_ms > 0).then(|| Duration::from_millis(self.max_orientation_age_ms))
    }

    /// Rest pose with zeroed placeholders, native order.
    pub fn rest_pose_native(&self) -> JointVector<Native> {
        JointVector::from_actuated(&self.rest_pose)
    }

    pub fn rest_pose_policy(&self) -> JointVector<Policy> {
        self.rest_pose_native().to_policy()
    }

    /// Per-axis gains applied to external commands: forward, lateral, yaw.
    pub fn command_gains(&self) -> [f32; 3] {
        [
            self.linear_velocity_scale,
            self.linear_velocity_scale,
            self.angular_velocity_scale,
        ]
    }

    pub fn axis_correction(&self) -> Result<AxisCorrection, LocoError> {
        AxisCorrection::new(self.orientation_axis_order, self.pitch_axis, self.pitch_bias_deg)
    }

    /// Sampler settings: axis correction and half the control period.
    pub fn sampler_config(&self) -> Result<SamplerConfig, LocoError> {
        SamplerConfig::for_control_frequency(self.control_frequency_hz, self.axis_correction()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tuning() {
        let cfg = ControlConfig::default();
        assert_eq!(cfg.control_frequency_hz, 30.0);
        assert_eq!(cfg.pid, PidGains::new(1000.0, 0.0, 500.0));
        assert_eq!(cfg.action_scale, 0.25);
        assert_eq!(cfg.cutoff_frequency_hz, 10.0);
        assert_eq!(cfg.command_gains(), [2.0, 2.0, 0.25]);
        assert_eq!(cfg.observation_history_len, 15);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn period_is_inverse_frequency() {
        let cfg = ControlConfig {
            control_frequency_hz: 50.0,
            ..Default::default()
        };
        assert!((cfg.period().unwrap().as_secs_f32() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn frequency_without_a_representable_period_is_rejected() {
        let cfg = ControlConfig {
            control_frequency_hz: 1e-20,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(LocoError::Config(_))));
        assert!(cfg.period().is_err());
        assert!(cfg.sampler_config().is_err());
    }

    #[test]
    fn zero_staleness_disables_the_check() {
        let mut cfg = ControlConfig::default();
        assert_eq!(cfg.max_orientation_age(), Some(Duration::from_millis(250)));
        cfg.max_orientation_age_ms = 0;
        assert_eq!(cfg.max_orientation_age(), None);
    }

    #[test]
    fn rest_pose_placeholders_are_zero() {
        let cfg = ControlConfig::default();
        let native = cfg.rest_pose_native();
        assert_eq!(native.get("left_antenna"), Some(0.0));
        assert_eq!(native.get("right_knee"), Some(-1.2));
        assert_eq!(cfg.rest_pose_policy().get("right_knee"), Some(-1.2));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_freq = ControlConfig {
            control_frequency_hz: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad_freq.validate(), Err(LocoError::Config(_))));

        let bad_axes = ControlConfig {
            orientation_axis_order: [0, 0, 1],
            ..Default::default()
        };
        assert!(bad_axes.validate().is_err());

        let bad_history = ControlConfig {
            observation_history_len: 0,
            ..Default::default()
        };
        assert!(bad_history.validate().is_err());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let cfg: ControlConfig =
            serde_json::from_str(r#"{"control_frequency_hz": 60.0, "pid": {"p": 800, "i": 0, "d": 200}}"#).unwrap();
        assert_eq!(cfg.control_frequency_hz, 60.0);
        assert_eq!(cfg.pid, PidGains::new(800.0, 0.0, 200.0));
        assert_eq!(cfg.action_scale, 0.25);
        assert_eq!(cfg.rest_pose, default_rest_pose());
    }
}
