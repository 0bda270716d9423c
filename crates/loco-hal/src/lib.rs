//! `loco-hal` – Hardware Abstraction Layer.
//!
//! The controller never talks to a servo or sensor driver directly; it talks
//! to the traits defined here, so drivers can be swapped (or simulated)
//! without touching the control loop.
//!
//! # Modules
//!
//! - [`servo`] – [`Servo`][servo::Servo]: a single position-controlled joint.
//! - [`bus`] – [`JointBus`][bus::JointBus]: whole-robot joint interface in
//!   native order, and [`ServoBus`][bus::ServoBus], a registry of per-joint
//!   [`Servo`][servo::Servo] drivers implementing it.
//! - [`imu`] – [`OrientationSensor`][imu::OrientationSensor]: an absolute
//!   orientation sensor that reports quaternions and may fail transiently.
//! - [`sim`] – in-process simulated drivers for headless runs and CI.

pub mod bus;
pub mod imu;
pub mod servo;
pub mod sim;

pub use bus::{JointBus, ServoBus};
pub use imu::{OrientationSensor, QuaternionReading};
pub use servo::Servo;
