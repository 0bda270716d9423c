//! [`ActionFilter`] – per-joint single-pole low-pass on policy actions.
//!
//! Each joint is filtered independently with the discrete RC form
//!
//! ```text
//! y[k] = y[k-1] + alpha * (x[k] - y[k-1])
//! alpha = dt / (rc + dt),  rc = 1 / (2π fc),  dt = 1 / fs
//! ```
//!
//! `alpha` is fixed at construction.  A cutoff at or above Nyquist (`fs/2`)
//! is clamped to Nyquist, which gives the lightest smoothing the filter
//! offers instead of an error.
//!
//! # Example
//!
//! ```rust
//! use loco_runtime::action_filter::ActionFilter;
//! use loco_types::{JointVector, Policy};
//!
//! let mut filter = ActionFilter::new(30.0, 10.0);
//! let target = JointVector::<Policy>::from_fn(|_| 1.0);
//! for _ in 0..100 {
//!     filter.push(target);
//! }
//! assert!(filter.get_filtered().max_abs_diff(&target) < 1e-3);
//! ```

use std::f32::consts::PI;

use loco_types::{JointVector, Policy};

/// Low-pass filter state, owned by the control loop thread.
#[derive(Debug, Clone)]
pub struct ActionFilter {
    alpha: f32,
    state: JointVector<Policy>,
}

impl ActionFilter {
    /// Filter sampled at `control_frequency_hz` with corner `cutoff_hz`.
    /// State starts at zero.
    pub fn new(control_frequency_hz: f32, cutoff_hz: f32) -> Self {
        Self {
            alpha: smoothing_factor(control_frequency_hz, cutoff_hz),
            state: JointVector::zeros(),
        }
    }

    /// Start from `initial` instead of zero.
    pub fn with_initial(mut self, initial: JointVector<Policy>) -> Self {
        self.state = initial;
        self
    }

    /// Blend `raw` into the filter state.
    pub fn push(&mut self, raw: JointVector<Policy>) {
        let alpha = self.alpha;
        self.state = self.state.zip_map(raw, |y, x| y + alpha * (x - y));
    }

    /// Current filtered estimate.
    pub fn get_filtered(&self) -> JointVector<Policy> {
        self.state
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn reset(&mut self, state: JointVector<Policy>) {
        self.state = state;
    }
}

fn smoothing_factor(control_frequency_hz: f32, cutoff_hz: f32) -> f32 {
    if !(control_frequency_hz.is_finite() && control_frequency_hz > 0.0) {
        return 1.0;
    }
    let nyquist = control_frequency_hz / 2.0;
    let fc = if cutoff_hz.is_finite() && cutoff_hz > 0.0 {
        cutoff_hz.min(nyquist)
    } else {
        nyquist
    };
    let dt = 1.0 / control_frequency_hz;
    let rc = 1.0 / (2.0 * PI * fc);
    dt / (rc + dt)
}
