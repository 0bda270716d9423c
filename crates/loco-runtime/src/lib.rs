//! `loco-runtime` – the real-time locomotion control core.
//!
//! # Modules
//!
//! - [`config`] – [`ControlConfig`], the context object every component is
//!   built from.
//! - [`action_filter`] – per-joint low-pass smoothing of policy actions.
//! - [`observation`] – observation layout and the [`ObservationAssembler`].
//! - [`inference`] – the [`InferenceEngine`] contract and [`AffinePolicy`].
//! - [`policy`] – [`PolicyAdapter`] (direct and adaptive modes) and the
//!   observation history window.
//! - [`control_loop`] – the fixed-frequency [`ControlLoop`] state machine.
//! - [`telemetry`] – `tracing` subscriber and optional OTLP export.

pub mod action_filter;
pub mod config;
pub mod control_loop;
pub mod inference;
pub mod observation;
pub mod policy;
pub mod telemetry;

pub use action_filter::ActionFilter;
pub use config::ControlConfig;
pub use control_loop::{ControlLoop, LoopState, LoopStats, Pacer, SessionReport, StopReason};
pub use inference::{AffinePolicy, InferenceEngine};
pub use observation::{OBSERVATION_LEN, Observation, ObservationAssembler, ObservationLayout};
pub use policy::{ObservationHistory, PolicyAdapter, PolicyMode};
