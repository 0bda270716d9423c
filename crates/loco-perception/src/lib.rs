//! `loco-perception` – orientation estimation.
//!
//! Turns the raw orientation sensor stream into the body attitude the
//! control loop consumes.
//!
//! # Modules
//!
//! - [`transform`] – [`Quaternion`][transform::Quaternion],
//!   [`Euler`][transform::Euler] and [`Vec3`][transform::Vec3] math,
//!   including the inverse rotation used for projected gravity.
//! - [`orientation`] – [`LatestOrientation`][orientation::LatestOrientation]:
//!   the single-slot, most-recent-wins cell shared between the sampler and
//!   the control loop.
//! - [`sampler`] – [`OrientationSampler`][sampler::OrientationSampler]: the
//!   background thread that reads the sensor, applies the mounting
//!   correction and publishes into the cell.

pub mod orientation;
pub mod sampler;
pub mod transform;

pub use orientation::{LatestOrientation, OrientationSample};
pub use sampler::{AxisCorrection, OrientationSampler, SamplerConfig, SamplerStats};
pub use transform::{Euler, Quaternion, Vec3};
