//! [`PolicyAdapter`] – turns an observation into a raw action.
//!
//! Two modes, fixed at construction:
//!
//! - **Direct** – the observation goes straight to the policy engine.
//! - **Adaptive** – each observation is appended to an
//!   [`ObservationHistory`]; the flattened window goes through the
//!   adaptation module to produce a latent vector, and the policy receives
//!   `[observation, latent]`.
//!
//! Engine input/output lengths are checked once when the adapter is built
//! and again on every call.  Any engine failure is returned as-is; the
//! caller decides that it is fatal.

use std::collections::VecDeque;

use loco_types::{JointVector, LocoError, NUM_JOINTS, Policy};
use tracing::info;

use crate::inference::InferenceEngine;
use crate::observation::{OBSERVATION_LEN, Observation};

// ─────────────────────────────────────────────────────────────────────────────
// ObservationHistory
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity window of the most recent observations, oldest first.
///
/// Starts full of zero observations so its flattened length never changes.
#[derive(Debug, Clone)]
pub struct ObservationHistory {
    frames: VecDeque<Observation>,
    capacity: usize,
}

impl ObservationHistory {
    /// A zero-filled window of `capacity` observations (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: std::iter::repeat_n(Observation::zeros(), capacity).collect(),
            capacity,
        }
    }

    /// Append `obs`, evicting the oldest entry.
    pub fn push(&mut self, obs: Observation) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(obs);
    }

    /// All observations concatenated in chronological order.
    pub fn flattened(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.flat_len());
        for frame in &self.frames {
            out.extend_from_slice(frame.as_slice());
        }
        out
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flat_len(&self) -> usize {
        self.capacity * OBSERVATION_LEN
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PolicyAdapter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Direct,
    Adaptive,
}

struct Adaptation {
    engine: Box<dyn InferenceEngine>,
    history: ObservationHistory,
}

pub struct PolicyAdapter {
    policy: Box<dyn InferenceEngine>,
    adaptation: Option<Adaptation>,
}

impl PolicyAdapter {
    /// Direct mode.
    ///
    /// # Errors
    ///
    /// [`LocoError::DimensionMismatch`] unless `policy` maps an observation
    /// to one value per joint.
    pub fn direct(policy: Box<dyn InferenceEngine>) -> Result<Self, LocoError> {
        check_len("policy input", OBSERVATION_LEN, policy.input_len())?;
        check_len("policy output", NUM_JOINTS, policy.output_len())?;
        info!(input = policy.input_len(), "policy adapter ready (direct)");
        Ok(Self {
            policy,
            adaptation: None,
        })
    }

    /// Adaptive mode with a window of `history_len` observations.
    ///
    /// # Errors
    ///
    /// [`LocoError::DimensionMismatch`] unless the adaptation module takes
    /// `history_len × observation` values and the policy takes
    /// `observation + latent` values and emits one value per joint.
    pub fn adaptive(
        policy: Box<dyn InferenceEngine>,
        adaptation_module: Box<dyn InferenceEngine>,
        history_len: usize,
    ) -> Result<Self, LocoError> {
        let history = ObservationHistory::new(history_len);
        check_len("adaptation module input", history.flat_len(), adaptation_module.input_len())?;
        check_len(
            "policy input",
            OBSERVATION_LEN + adaptation_module.output_len(),
            policy.input_len(),
        )?;
        check_len("policy output", NUM_JOINTS, policy.output_len())?;
        info!(
            history = history.capacity(),
            latent = adaptation_module.output_len(),
            "policy adapter ready (adaptive)"
        );
        Ok(Self {
            policy,
            adaptation: Some(Adaptation {
                engine: adaptation_module,
                history,
            }),
        })
    }

    pub fn mode(&self) -> PolicyMode {
        if self.adaptation.is_some() {
            PolicyMode::Adaptive
        } else {
            PolicyMode::Direct
        }
    }

    /// The observation window, in adaptive mode.
    pub fn history(&self) -> Option<&ObservationHistory> {
        self.adaptation.as_ref().map(|a| &a.history)
    }

    /// Compute the raw action for `obs`.
    pub fn infer(&mut self, obs: &Observation) -> Result<JointVector<Policy>, LocoError> {
        let output = match &mut self.adaptation {
            None => self.policy.infer(obs.as_slice())?,
            Some(adaptation) => {
                adaptation.history.push(*obs);
                let latent = adaptation.engine.infer(&adaptation.history.flattened())?;
                check_len(
                    "adaptation module output",
                    adaptation.engine.output_len(),
                    latent.len(),
                )?;
                let mut input = Vec::with_capacity(OBSERVATION_LEN + latent.len());
                input.extend_from_slice(obs.as_slice());
                input.extend_from_slice(&latent);
                self.policy.infer(&input)?
            }
        };
        JointVector::from_slice(&output)
    }
}

fn check_len(context: &str, expected: usize, actual: usize) -> Result<(), LocoError> {
    if expected == actual {
        Ok(())
    } else {
        Err(LocoError::dimension(context, expected, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::AffinePolicy;

    fn obs_filled(v: f32) -> Observation {
        let j = JointVector::<Policy>::from_fn(|_| v);
        Observation::compose(
            loco_perception::transform::Vec3::new(v, v, v),
            loco_types::Command::new(v, v, v),
            &j,
            &j,
            &j,
        )
    }

    #[test]
    fn history_starts_zero_filled() {
        let h = ObservationHistory::new(3);
        let flat = h.flattened();
        assert_eq!(flat.len(), 3 * OBSERVATION_LEN);
        assert!(flat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut h = ObservationHistory::new(2);
        h.push(obs_filled(1.0));
        h.push(obs_filled(2.0));
        h.push(obs_filled(3.0));
        let flat = h.flattened();
        assert_eq!(flat[0], 2.0);
        assert_eq!(flat[OBSERVATION_LEN], 3.0);
    }

    #[test]
    fn direct_mode_checks_dimensions() {
        assert!(PolicyAdapter::direct(Box::new(AffinePolicy::zeros(OBSERVATION_LEN, NUM_JOINTS))).is_ok());
        assert!(matches!(
            PolicyAdapter::direct(Box::new(AffinePolicy::zeros(50, NUM_JOINTS))),
            Err(LocoError::DimensionMismatch { .. })
        ));
        assert!(PolicyAdapter::direct(Box::new(AffinePolicy::zeros(OBSERVATION_LEN, 13))).is_err());
    }

    #[test]
    fn adaptive_mode_checks_dimensions() {
        let latent = 8;
        let ok = PolicyAdapter::adaptive(
            Box::new(AffinePolicy::zeros(OBSERVATION_LEN + latent, NUM_JOINTS)),
            Box::new(AffinePolicy::zeros(4 * OBSERVATION_LEN, latent)),
            4,
        )
        .unwrap();
        assert_eq!(ok.mode(), PolicyMode::Adaptive);
        assert_eq!(ok.history().unwrap().capacity(), 4);

        let wrong_window = PolicyAdapter::adaptive(
            Box::new(AffinePolicy::zeros(OBSERVATION_LEN + latent, NUM_JOINTS)),
            Box::new(AffinePolicy::zeros(3 * OBSERVATION_LEN, latent)),
            4,
        );
        assert!(wrong_window.is_err());
    }

    #[test]
    fn direct_mode_returns_policy_output() {
        let mut bias = vec![0.0; NUM_JOINTS];
        bias[2] = 0.7;
        let engine = AffinePolicy::new(vec![vec![0.0; OBSERVATION_LEN]; NUM_JOINTS], bias).unwrap();
        let mut adapter = PolicyAdapter::direct(Box::new(engine)).unwrap();
        assert_eq!(adapter.mode(), PolicyMode::Direct);
        assert!(adapter.history().is_none());
        let action = adapter.infer(&obs_filled(1.0)).unwrap();
        assert_eq!(action[2], 0.7);
        assert_eq!(action[0], 0.0);
    }

    #[test]
    fn adaptive_mode_appends_before_inference() {
        let mut adapter = PolicyAdapter::adaptive(
            Box::new(AffinePolicy::zeros(OBSERVATION_LEN + 2, NUM_JOINTS)),
            Box::new(AffinePolicy::zeros(2 * OBSERVATION_LEN, 2)),
            2,
        )
        .unwrap();
        adapter.infer(&obs_filled(5.0)).unwrap();
        let flat = adapter.history().unwrap().flattened();
        assert_eq!(flat[0], 0.0);
        assert_eq!(flat[OBSERVATION_LEN], 5.0);
    }
}
