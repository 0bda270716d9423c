//! [`OrientationSampler`] – background orientation acquisition.
//!
//! Sensor reads have unpredictable latency, so they run on a dedicated thread
//! decoupled from the control loop.  Each cycle:
//!
//! 1. read a quaternion from the [`OrientationSensor`];
//! 2. on failure, log and retry immediately (never exits on sensor errors);
//! 3. apply the [`AxisCorrection`] (Euler decomposition, axis permutation,
//!    calibration bias, recomposition);
//! 4. publish into the shared [`LatestOrientation`] cell;
//! 5. sleep for the configured period (half the control period, so the
//!    sensor is sampled at roughly twice the loop rate).
//!
//! The loop checks a stop flag at the top of every cycle, including retries,
//! so the thread always shuts down cleanly.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use loco_hal::sim::SimImu;
//! use loco_perception::orientation::LatestOrientation;
//! use loco_perception::sampler::{AxisCorrection, OrientationSampler, SamplerConfig};
//!
//! let cell = Arc::new(LatestOrientation::new());
//! let config = SamplerConfig::new(Duration::from_millis(5), AxisCorrection::identity());
//! let sampler = OrientationSampler::spawn(SimImu::new(), config, Arc::clone(&cell)).unwrap();
//! while cell.latest().is_none() {
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! let stats = sampler.stop();
//! assert!(stats.published >= 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use loco_hal::imu::OrientationSensor;
use loco_types::LocoError;
use tracing::{debug, info, warn};

use crate::orientation::LatestOrientation;
use crate::transform::{Euler, Quaternion};

// ────────────────────────────────────────────────────────────────────────────
// Axis correction
// ────────────────────────────────────────────────────────────────────────────

/// Maps the sensor's mounting frame onto the robot's reference frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCorrection {
    /// Output Euler axis `i` takes sensor Euler axis `axis_order[i]`.
    axis_order: [usize; 3],
    /// Robot-frame Euler axis receiving the calibration bias.
    bias_axis: usize,
    /// Calibration bias in radians.
    bias_rad: f32,
}

impl AxisCorrection {
    /// Build a correction.  `bias_deg` is converted to radians here.
    ///
    /// # Errors
    ///
    /// Returns [`LocoError::Config`] if `axis_order` is not a permutation of
    /// `[0, 1, 2]` or `bias_axis > 2`.
    pub fn new(axis_order: [usize; 3], bias_axis: usize, bias_deg: f32) -> Result<Self, LocoError> {
        let mut seen = [false; 3];
        for &a in &axis_order {
            if a > 2 || seen[a] {
                return Err(LocoError::Config(format!(
                    "orientation axis order {axis_order:?} is not a permutation of [0, 1, 2]"
                )));
            }
            seen[a] = true;
        }
        if bias_axis > 2 {
            return Err(LocoError::Config(format!(
                "calibration bias axis {bias_axis} is out of range"
            )));
        }
        Ok(Self {
            axis_order,
            bias_axis,
            bias_rad: bias_deg.to_radians(),
        })
    }

    /// No permutation, no bias.
    pub fn identity() -> Self {
        Self {
            axis_order: [0, 1, 2],
            bias_axis: 1,
            bias_rad: 0.0,
        }
    }

    /// Apply the correction to a unit quaternion.
    pub fn apply(&self, q: Quaternion) -> Quaternion {
        let mut angles = q.to_euler().permuted(self.axis_order).to_array();
        angles[self.bias_axis] += self.bias_rad;
        Quaternion::from_euler(Euler::from_array(angles))
    }
}

/// One acquisition step: read, validate, correct.
///
/// # Errors
///
/// Propagates the sensor's read error, or [`LocoError::InvalidQuaternion`]
/// for a zero or non-finite reading.
pub fn sample_once<S: OrientationSensor + ?Sized>(
    sensor: &mut S,
    correction: &AxisCorrection,
) -> Result<Quaternion, LocoError> {
    let raw = Quaternion::from(sensor.read_quaternion()?);
    let unit = raw.normalized().ok_or(LocoError::InvalidQuaternion)?;
    Ok(correction.apply(unit))
}

// ────────────────────────────────────────────────────────────────────────────
// Sampler
// ────────────────────────────────────────────────────────────────────────────

/// Sampler timing and frame correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Sleep between successful samples.
    pub period: Duration,
    pub correction: AxisCorrection,
}

impl SamplerConfig {
    pub fn new(period: Duration, correction: AxisCorrection) -> Self {
        Self { period, correction }
    }

    /// Sample at twice `control_frequency_hz`.
    pub fn for_control_frequency(
        control_frequency_hz: f32,
        correction: AxisCorrection,
    ) -> Result<Self, LocoError> {
        let period = loco_types::period_from_hz(control_frequency_hz * 2.0)?;
        Ok(Self::new(period, correction))
    }
}

/// Counters returned when the sampler thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Samples published to the cell.
    pub published: u64,
    /// Failed reads (each one retried).
    pub failures: u64,
}

/// Handle to the running sampler thread.
///
/// Dropping the handle stops and joins the thread.
pub struct OrientationSampler {
    cell: Arc<LatestOrientation>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<SamplerStats>>,
}

impl OrientationSampler {
    /// Start sampling `sensor` on a new thread, publishing into `cell`.
    ///
    /// # Errors
    ///
    /// Returns [`LocoError::HardwareFault`] if the OS refuses to spawn the
    /// thread.
    pub fn spawn<S>(sensor: S, config: SamplerConfig, cell: Arc<LatestOrientation>) -> Result<Self, LocoError>
    where
        S: OrientationSensor + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let cell = Arc::clone(&cell);
            thread::Builder::new()
                .name("orientation-sampler".to_string())
                .spawn(move || run_sampler(sensor, config, &cell, &stop))
                .map_err(|e| LocoError::HardwareFault {
                    component: "orientation-sampler".to_string(),
                    details: format!("failed to spawn sampler thread: {e}"),
                })?
        };
        info!(period_ms = config.period.as_secs_f64() * 1e3, "orientation sampler started");
        Ok(Self {
            cell,
            stop,
            handle: Some(handle),
        })
    }

    /// The cell this sampler publishes into.
    pub fn cell(&self) -> Arc<LatestOrientation> {
        Arc::clone(&self.cell)
    }

    /// `true` while the thread has not exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and return its counters.
    pub fn stop(mut self) -> SamplerStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SamplerStats {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => {
                info!(published = stats.published, failures = stats.failures, "orientation sampler stopped");
                stats
            }
            Some(Err(_)) => {
                warn!("orientation sampler thread panicked");
                SamplerStats::default()
            }
            None => SamplerStats::default(),
        }
    }
}

impl Drop for OrientationSampler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn run_sampler<S: OrientationSensor>(
    mut sensor: S,
    config: SamplerConfig,
    cell: &LatestOrientation,
    stop: &AtomicBool,
) -> SamplerStats {
    let mut stats = SamplerStats::default();
    while !stop.load(Ordering::SeqCst) {
        match sample_once(&mut sensor, &config.correction) {
            Ok(q) => {
                let seq = cell.publish(q);
                stats.published += 1;
                if seq % 1000 == 0 {
                    debug!(seq, failures = stats.failures, "orientation samples published");
                }
                thread::sleep(config.period);
            }
            Err(e) => {
                stats.failures += 1;
                warn!(error = %e, failures = stats.failures, "orientation read failed; retrying");
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use loco_hal::imu::QuaternionReading;
    use loco_hal::sim::SimImu;
    use std::f32::consts::FRAC_PI_2;
    use std::time::Instant;

    fn wait_for(cell: &LatestOrientation, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while cell.published() < n {
            assert!(Instant::now() < deadline, "sampler did not publish in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn identity_correction_is_noop() {
        let q = Quaternion::from_euler(Euler::new(0.1, 0.2, 0.3));
        let out = AxisCorrection::identity().apply(q);
        assert!((out.w - q.w).abs() < 1e-5);
        assert!((out.x - q.x).abs() < 1e-5);
    }

    #[test]
    fn pitch_bias_is_added_in_radians() {
        let c = AxisCorrection::new([0, 1, 2], 1, 10.0).unwrap();
        let e = c.apply(Quaternion::identity()).to_euler();
        assert!((e.y - 10f32.to_radians()).abs() < 1e-5);
        assert!(e.x.abs() < 1e-5 && e.z.abs() < 1e-5);
    }

    #[test]
    fn axes_are_permuted_before_bias() {
        // Sensor reports a pure roll; with order [1, 2, 0] roll lands on z.
        let c = AxisCorrection::new([1, 2, 0], 1, 0.0).unwrap();
        let q = Quaternion::from_euler(Euler::new(0.4, 0.0, 0.0));
        let e = c.apply(q).to_euler();
        assert!(e.x.abs() < 1e-5);
        assert!(e.y.abs() < 1e-5);
        assert!((e.z - 0.4).abs() < 1e-5);
    }

    #[test]
    fn invalid_axis_order_is_rejected() {
        assert!(matches!(AxisCorrection::new([0, 0, 2], 1, 0.0), Err(LocoError::Config(_))));
        assert!(matches!(AxisCorrection::new([0, 1, 3], 1, 0.0), Err(LocoError::Config(_))));
        assert!(matches!(AxisCorrection::new([0, 1, 2], 3, 0.0), Err(LocoError::Config(_))));
    }

    #[test]
    fn sample_once_rejects_zero_quaternion() {
        let mut imu = SimImu::with_reading(QuaternionReading::new(0.0, 0.0, 0.0, 0.0));
        let err = sample_once(&mut imu, &AxisCorrection::identity()).unwrap_err();
        assert_eq!(err, LocoError::InvalidQuaternion);
    }

    #[test]
    fn sample_once_normalises_near_unit_readings() {
        let mut imu = SimImu::with_reading(QuaternionReading::new(1.02, 0.0, 0.0, 0.0));
        let q = sample_once(&mut imu, &AxisCorrection::identity()).unwrap();
        assert!((q.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn control_frequency_sets_half_period() {
        let cfg = SamplerConfig::for_control_frequency(50.0, AxisCorrection::identity()).unwrap();
        assert!((cfg.period.as_secs_f64() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn control_frequency_without_a_period_is_rejected() {
        let cfg = SamplerConfig::for_control_frequency(1e-20, AxisCorrection::identity());
        assert!(matches!(cfg, Err(LocoError::Config(_))));
    }

    #[test]
    fn sampler_publishes_corrected_orientation() {
        let reading = {
            let q = Quaternion::from_euler(Euler::new(FRAC_PI_2 / 3.0, 0.0, 0.0));
            QuaternionReading::new(q.w, q.x, q.y, q.z)
        };
        let correction = AxisCorrection::new([1, 2, 0], 1, 0.0).unwrap();
        let cell = Arc::new(LatestOrientation::new());
        let sampler = OrientationSampler::spawn(
            SimImu::with_reading(reading),
            SamplerConfig::new(Duration::from_millis(2), correction),
            Arc::clone(&cell),
        )
        .unwrap();

        wait_for(&cell, 3);
        let e = cell.latest().unwrap().quaternion.to_euler();
        assert!((e.z - FRAC_PI_2 / 3.0).abs() < 1e-4);
        assert!(sampler.is_running());
        sampler.stop();
    }

    #[test]
    fn sampler_survives_transient_failures() {
        let imu = SimImu::new().with_failure_every(2);
        let reads = imu.read_counter();
        let cell = Arc::new(LatestOrientation::new());
        let sampler = OrientationSampler::spawn(
            imu,
            SamplerConfig::new(Duration::from_millis(1), AxisCorrection::identity()),
            Arc::clone(&cell),
        )
        .unwrap();

        wait_for(&cell, 10);
        let stats = sampler.stop();
        assert!(stats.failures >= 9, "every second read fails: {stats:?}");
        assert_eq!(stats.published + stats.failures, reads.load(Ordering::Relaxed));
    }

    #[test]
    fn sampler_with_dead_sensor_never_publishes_but_stops_cleanly() {
        let cell = Arc::new(LatestOrientation::new());
        let sampler = OrientationSampler::spawn(
            SimImu::new().with_failure_every(1),
            SamplerConfig::new(Duration::from_millis(1), AxisCorrection::identity()),
            Arc::clone(&cell),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        let stats = sampler.stop();
        assert_eq!(stats.published, 0);
        assert!(stats.failures > 0);
        assert!(cell.latest().is_none());
    }
}
