//! Joint layout and the native ⇄ policy coordinate mapper.
//!
//! The robot has 13 actuated joints plus two non-actuated placeholders (the
//! antennas) that the policy was trained with.  Two orderings exist:
//!
//! - **Native** – the order in which the servo bus reports and accepts joint
//!   values.
//! - **Policy** – the order the inference engine expects.
//!
//! The mapping between them is an explicit permutation table plus a per-joint
//! sign, so [`to_policy_order`] and [`to_native_order`] are exact inverses.
//!
//! # Example
//!
//! ```rust
//! use loco_types::joints::{to_native_order, to_policy_order, JointVector, Native};
//!
//! let native = JointVector::<Native>::from_fn(|i| i as f32);
//! let policy = to_policy_order(&native);
//! assert_eq!(policy.get("right_knee"), native.get("right_knee"));
//! assert_eq!(to_native_order(&policy), native);
//! ```

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Index;

use crate::LocoError;

/// Total joint count including the two placeholders.
pub const NUM_JOINTS: usize = 15;

/// Number of physical, actuated joints.  These occupy native indices
/// `0..NUM_ACTUATED`; the placeholders follow.
pub const NUM_ACTUATED: usize = 13;

/// Joint names in native (servo bus) order.
pub const NATIVE_JOINT_NAMES: [&str; NUM_JOINTS] = [
    "right_hip_yaw",
    "right_hip_roll",
    "right_hip_pitch",
    "right_knee",
    "right_ankle",
    "left_hip_yaw",
    "left_hip_roll",
    "left_hip_pitch",
    "left_knee",
    "left_ankle",
    "neck_pitch",
    "head_pitch",
    "head_yaw",
    "left_antenna",
    "right_antenna",
];

/// Joint names in policy order.
pub const POLICY_JOINT_NAMES: [&str; NUM_JOINTS] = [
    "left_hip_yaw",
    "left_hip_roll",
    "left_hip_pitch",
    "left_knee",
    "left_ankle",
    "neck_pitch",
    "head_pitch",
    "head_yaw",
    "left_antenna",
    "right_antenna",
    "right_hip_yaw",
    "right_hip_roll",
    "right_hip_pitch",
    "right_knee",
    "right_ankle",
];

/// `POLICY_FROM_NATIVE[i]` is the native index feeding policy index `i`.
pub const POLICY_FROM_NATIVE: [usize; NUM_JOINTS] = [5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 0, 1, 2, 3, 4];

/// Sign applied to policy index `i` when converting from native order.
/// Every entry must be `1.0` or `-1.0`.
pub const POLICY_SIGNS: [f32; NUM_JOINTS] = [1.0; NUM_JOINTS];

// ────────────────────────────────────────────────────────────────────────────
// Order markers
// ────────────────────────────────────────────────────────────────────────────

/// A joint ordering convention.
pub trait JointOrder: Copy + Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Joint names in this order.
    const NAMES: [&'static str; NUM_JOINTS];
    /// Human-readable label used in error messages.
    const LABEL: &'static str;
}

/// Hardware / servo-bus order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Native;

/// Inference-engine order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy;

impl JointOrder for Native {
    const NAMES: [&'static str; NUM_JOINTS] = NATIVE_JOINT_NAMES;
    const LABEL: &'static str = "native";
}

impl JointOrder for Policy {
    const NAMES: [&'static str; NUM_JOINTS] = POLICY_JOINT_NAMES;
    const LABEL: &'static str = "policy";
}

// ────────────────────────────────────────────────────────────────────────────
// JointVector
// ────────────────────────────────────────────────────────────────────────────

/// One scalar per joint, tagged with the ordering it is expressed in.
///
/// The tag makes it a compile error to hand a native-order vector to code
/// that expects policy order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointVector<O: JointOrder> {
    values: [f32; NUM_JOINTS],
    _order: PhantomData<O>,
}

impl<O: JointOrder> JointVector<O> {
    pub fn new(values: [f32; NUM_JOINTS]) -> Self {
        Self {
            values,
            _order: PhantomData,
        }
    }

    pub fn zeros() -> Self {
        Self::new([0.0; NUM_JOINTS])
    }

    pub fn from_fn(f: impl FnMut(usize) -> f32) -> Self {
        Self::new(std::array::from_fn(f))
    }

    /// Build from a slice that must hold exactly [`NUM_JOINTS`] values.
    ///
    /// # Errors
    ///
    /// Returns [`LocoError::DimensionMismatch`] for any other length.
    pub fn from_slice(values: &[f32]) -> Result<Self, LocoError> {
        let values: [f32; NUM_JOINTS] = values.try_into().map_err(|_| {
            LocoError::dimension(format!("{} joint vector", O::LABEL), NUM_JOINTS, values.len())
        })?;
        Ok(Self::new(values))
    }

    /// Build from the [`NUM_ACTUATED`] physical joints, padding the
    /// placeholders with zero.  Only meaningful in native order, where the
    /// placeholders trail the actuated joints.
    pub fn from_actuated(actuated: &[f32; NUM_ACTUATED]) -> Self {
        Self::from_fn(|i| if i < NUM_ACTUATED { actuated[i] } else { 0.0 })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn to_array(self) -> [f32; NUM_JOINTS] {
        self.values
    }

    /// Look up a joint by name.
    pub fn get(&self, name: &str) -> Option<f32> {
        O::NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    pub fn map(self, mut f: impl FnMut(f32) -> f32) -> Self {
        Self::from_fn(|i| f(self.values[i]))
    }

    pub fn zip_map(self, other: Self, mut f: impl FnMut(f32, f32) -> f32) -> Self {
        Self::from_fn(|i| f(self.values[i], other.values[i]))
    }

    pub fn scale(self, k: f32) -> Self {
        self.map(|v| v * k)
    }

    pub fn add(self, other: Self) -> Self {
        self.zip_map(other, |a, b| a + b)
    }

    pub fn sub(self, other: Self) -> Self {
        self.zip_map(other, |a, b| a - b)
    }

    /// Largest absolute per-joint difference to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

impl<O: JointOrder> Default for JointVector<O> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<O: JointOrder> Index<usize> for JointVector<O> {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.values[index]
    }
}

impl JointVector<Native> {
    /// Zero the placeholder joints.
    pub fn without_placeholders(self) -> Self {
        Self::from_fn(|i| if i < NUM_ACTUATED { self.values[i] } else { 0.0 })
    }

    /// Joint-name → target-angle map for the actuated joints only.
    /// Placeholders are never commanded.
    pub fn actuated_targets(&self) -> BTreeMap<&'static str, f32> {
        NATIVE_JOINT_NAMES[..NUM_ACTUATED]
            .iter()
            .zip(self.values.iter())
            .map(|(name, v)| (*name, *v))
            .collect()
    }

    pub fn to_policy(&self) -> JointVector<Policy> {
        to_policy_order(self)
    }
}

impl JointVector<Policy> {
    pub fn to_native(&self) -> JointVector<Native> {
        to_native_order(self)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinate mapper
// ────────────────────────────────────────────────────────────────────────────

/// Reorder (and sign-convert) a native-order vector into policy order.
pub fn to_policy_order(native: &JointVector<Native>) -> JointVector<Policy> {
    to_policy_with_signs(native, &POLICY_SIGNS)
}

/// Inverse of [`to_policy_order`].
pub fn to_native_order(policy: &JointVector<Policy>) -> JointVector<Native> {
    to_native_with_signs(policy, &POLICY_SIGNS)
}

fn to_policy_with_signs(native: &JointVector<Native>, signs: &[f32; NUM_JOINTS]) -> JointVector<Policy> {
    JointVector::from_fn(|i| signs[i] * native.values[POLICY_FROM_NATIVE[i]])
}

// Signs are ±1, so multiplying again undoes the flip.
fn to_native_with_signs(policy: &JointVector<Policy>, signs: &[f32; NUM_JOINTS]) -> JointVector<Native> {
    let mut out = [0.0; NUM_JOINTS];
    for (i, &src) in POLICY_FROM_NATIVE.iter().enumerate() {
        out[src] = signs[i] * policy.values[i];
    }
    JointVector::new(out)
}
