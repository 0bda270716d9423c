//! [`ControlLoop`] – the fixed-frequency locomotion loop.
//!
//! # States
//!
//! ```text
//! Idle ──start()──▶ Starting ──settle──▶ Running ──stop / fatal──▶ Stopped
//! ```
//!
//! `Starting` enables the servos, pushes the PID gains and waits the settle
//! delay.  Each `Running` iteration is strictly sequential:
//!
//! 1. assemble the observation (fatal if the orientation is missing or stale)
//!    and append it to the session trace;
//! 2. run the policy adapter (fatal on any engine error);
//! 3. keep the raw action as the next observation's previous action;
//! 4. scale it, add the rest pose, low-pass filter it;
//! 5. convert to native order and send the actuated joint targets;
//! 6. poll the command source, if any;
//! 7. sleep for whatever is left of the period.  An overrun skips the sleep
//!    and is never carried into the next iteration.
//!
//! The stop flag is checked at the top of every iteration.  Every exit from
//! `Running`, requested or fatal, writes the session trace before
//! [`ControlLoop::run`] returns.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use loco_hal::sim::SimBus;
//! use loco_perception::orientation::LatestOrientation;
//! use loco_perception::transform::Quaternion;
//! use loco_runtime::control_loop::{ControlLoop, StopReason};
//! use loco_runtime::inference::AffinePolicy;
//! use loco_runtime::observation::OBSERVATION_LEN;
//! use loco_runtime::policy::PolicyAdapter;
//! use loco_runtime::ControlConfig;
//! use loco_types::NUM_JOINTS;
//!
//! let config = ControlConfig { settle_delay_ms: 0, control_frequency_hz: 200.0, ..Default::default() };
//! let orientation = Arc::new(LatestOrientation::new());
//! orientation.publish(Quaternion::identity());
//!
//! let bus = SimBus::new().with_pose(config.rest_pose).build();
//! let policy = PolicyAdapter::direct(Box::new(AffinePolicy::zeros(OBSERVATION_LEN, NUM_JOINTS))).unwrap();
//! let mut control = ControlLoop::new(config, bus, orientation, policy).unwrap();
//!
//! let report = control.run(&AtomicBool::new(false), Some(5)).unwrap();
//! assert_eq!(report.stop_reason, StopReason::IterationLimit);
//! assert_eq!(report.records, 5);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use loco_hal::JointBus;
use loco_memory::{SessionRecorder, SessionStore};
use loco_middleware::CommandSource;
use loco_perception::orientation::LatestOrientation;
use loco_types::{Command, JointVector, LocoError, Policy};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action_filter::ActionFilter;
use crate::config::ControlConfig;
use crate::observation::{OBSERVATION_LEN, ObservationAssembler};
use crate::policy::PolicyAdapter;

// ─────────────────────────────────────────────────────────────────────────────
// State, stop reason, statistics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Stopped,
}

/// Why the loop left `Running`.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The shutdown flag was raised.
    Requested,
    /// The caller's iteration budget was reached.
    IterationLimit,
    /// An iteration failed and the loop could not continue safely.
    Fatal(LocoError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::IterationLimit => write!(f, "iteration limit reached"),
            StopReason::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

/// Timing statistics over the `Running` phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopStats {
    pub iterations: u64,
    /// Iterations whose work took longer than the period.
    pub overruns: u64,
    /// Sum of iteration periods, work plus sleep.
    pub total_period: Duration,
    pub max_period: Duration,
}

impl LoopStats {
    fn record(&mut self, period: Duration, overran: bool) {
        self.iterations += 1;
        self.total_period += period;
        self.max_period = self.max_period.max(period);
        if overran {
            self.overruns += 1;
        }
    }

    /// Mean iteration period, `None` before the first iteration.
    pub fn mean_period(&self) -> Option<Duration> {
        (self.iterations > 0)
            .then(|| self.total_period.as_secs_f64() / self.iterations as f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Effective loop frequency (Hz), `None` before the first iteration.
    pub fn mean_frequency_hz(&self) -> Option<f32> {
        self.mean_period()
            .filter(|p| !p.is_zero())
            .map(|p| 1.0 / p.as_secs_f32())
    }
}

/// What [`ControlLoop::run`] hands back once the loop has stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub stop_reason: StopReason,
    pub stats: LoopStats,
    /// Observations recorded in the session trace.
    pub records: usize,
    /// Where the trace was written, if a session path was configured.
    pub artifact: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pacer
// ─────────────────────────────────────────────────────────────────────────────

/// Sleeps out the remainder of a fixed period.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    period: Duration,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until `period` has passed since `started`.  Returns `true`
    /// (without sleeping) if that moment has already gone by.
    pub fn pace(&self, started: Instant) -> bool {
        let elapsed = started.elapsed();
        match self.period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => {
                thread::sleep(remaining);
                false
            }
            _ => {
                debug!(
                    elapsed_ms = elapsed.as_secs_f64() * 1e3,
                    period_ms = self.period.as_secs_f64() * 1e3,
                    "control period overrun"
                );
                true
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop<B: JointBus> {
    config: ControlConfig,
    bus: B,
    assembler: ObservationAssembler,
    policy: PolicyAdapter,
    filter: ActionFilter,
    commands: Option<Box<dyn CommandSource>>,
    command: Command,
    prev_action: JointVector<Policy>,
    rest_pose: JointVector<Policy>,
    recorder: SessionRecorder,
    session_path: Option<PathBuf>,
    pacer: Pacer,
    state: LoopState,
    stats: LoopStats,
}

impl<B: JointBus> ControlLoop<B> {
    /// Build an idle loop.
    ///
    /// The action filter is seeded with the rest pose so the first targets
    /// stay near home.
    ///
    /// # Errors
    ///
    /// [`LocoError::Config`] if `config` does not validate.
    pub fn new(
        config: ControlConfig,
        bus: B,
        orientation: Arc<LatestOrientation>,
        policy: PolicyAdapter,
    ) -> Result<Self, LocoError> {
        config.validate()?;
        let rest_pose = config.rest_pose_policy();
        Ok(Self {
            assembler: ObservationAssembler::new(&config, orientation),
            filter: ActionFilter::new(config.control_frequency_hz, config.cutoff_frequency_hz)
                .with_initial(rest_pose),
            pacer: Pacer::new(config.period()?),
            recorder: SessionRecorder::new(OBSERVATION_LEN),
            config,
            bus,
            policy,
            commands: None,
            command: Command::zero(),
            prev_action: JointVector::zeros(),
            rest_pose,
            session_path: None,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        })
    }

    /// Poll `source` after every iteration.
    pub fn with_commands(mut self, source: Box<dyn CommandSource>) -> Self {
        self.commands = Some(source);
        self
    }

    /// Write the session trace to the SQLite file at `path` on exit.
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Command that will go into the next observation.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Raw policy output of the last iteration.
    pub fn prev_action(&self) -> &JointVector<Policy> {
        &self.prev_action
    }

    pub fn filtered_action(&self) -> JointVector<Policy> {
        self.filter.get_filtered()
    }

    pub fn policy(&self) -> &PolicyAdapter {
        &self.policy
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    /// `Idle → Starting → Running`: enable servos, set gains, settle.
    ///
    /// A hardware error here moves the loop straight to `Stopped`.
    pub fn start(&mut self) -> Result<(), LocoError> {
        if self.state != LoopState::Idle {
            return Err(LocoError::Config(format!(
                "control loop can only start from Idle, currently {:?}",
                self.state
            )));
        }
        self.state = LoopState::Starting;
        info!(
            frequency_hz = self.config.control_frequency_hz,
            settle_ms = self.config.settle_delay_ms,
            "control loop starting"
        );

        let prepared = self
            .bus
            .enable()
            .and_then(|()| self.bus.set_gains(self.config.pid));
        if let Err(e) = prepared {
            error!(error = %e, "servo bring-up failed");
            self.state = LoopState::Stopped;
            return Err(e);
        }

        thread::sleep(self.config.settle_delay());
        self.state = LoopState::Running;
        info!(session = %self.recorder.session().id, "control loop running");
        Ok(())
    }

    /// Run one iteration without pacing.
    pub fn step(&mut self) -> Result<(), LocoError> {
        let obs = self
            .assembler
            .assemble(&mut self.bus, self.command, &self.prev_action)?;
        self.recorder
            .record_observation(obs.as_slice())
            .map_err(|e| LocoError::Persistence(e.to_string()))?;

        let raw = self.policy.infer(&obs)?;
        self.prev_action = raw;

        let target = raw.scale(self.config.action_scale).add(self.rest_pose);
        self.filter.push(target);
        let native = self.filter.get_filtered().to_native();

        self.bus.set_target_positions(&native.actuated_targets())?;
        self.recorder.record_action(native.as_slice());

        if let Some(source) = self.commands.as_mut() {
            if let Some(cmd) = source.latest_command() {
                self.command = cmd.scaled(self.config.command_gains());
            }
        }
        Ok(())
    }

    /// Drive the loop until `shutdown` is raised, `max_iterations` is
    /// reached or an iteration fails, then write the session trace.
    ///
    /// Starts the loop first if it is still `Idle`.
    ///
    /// # Errors
    ///
    /// - Any [`ControlLoop::start`] error (nothing has been recorded yet).
    /// - [`LocoError::Persistence`] if the trace could not be written.
    ///
    /// A fatal iteration error is not an `Err`: it is reported as
    /// [`StopReason::Fatal`] in the returned [`SessionReport`].
    pub fn run(
        &mut self,
        shutdown: &AtomicBool,
        max_iterations: Option<u64>,
    ) -> Result<SessionReport, LocoError> {
        if self.state == LoopState::Idle {
            self.start()?;
        }
        if self.state != LoopState::Running {
            return Err(LocoError::Config(format!(
                "control loop cannot run from {:?}",
                self.state
            )));
        }

        let reason = loop {
            if shutdown.load(Ordering::SeqCst) {
                break StopReason::Requested;
            }
            if max_iterations.is_some_and(|max| self.stats.iterations >= max) {
                break StopReason::IterationLimit;
            }

            let started = Instant::now();
            if let Err(e) = self.step() {
                break StopReason::Fatal(e);
            }
            let overran = self.pacer.pace(started);
            self.stats.record(started.elapsed(), overran);
        };

        self.finish(reason)
    }

    fn finish(&mut self, reason: StopReason) -> Result<SessionReport, LocoError> {
        self.state = LoopState::Stopped;
        match &reason {
            StopReason::Fatal(e) => error!(error = %e, "control loop stopped"),
            other => info!(reason = %other, "control loop stopped"),
        }
        if let Some(hz) = self.stats.mean_frequency_hz() {
            info!(
                iterations = self.stats.iterations,
                overruns = self.stats.overruns,
                mean_hz = hz,
                "loop statistics"
            );
        }

        self.recorder.set_stop_reason(reason.to_string());
        let artifact = match &self.session_path {
            Some(path) => {
                self.flush(path)?;
                Some(path.clone())
            }
            None => {
                warn!("no session path configured, trace kept in memory only");
                None
            }
        };

        Ok(SessionReport {
            session_id: self.recorder.session().id,
            stop_reason: reason,
            stats: self.stats,
            records: self.recorder.len(),
            artifact,
        })
    }

    fn flush(&self, path: &Path) -> Result<(), LocoError> {
        let persist = || -> Result<(), loco_memory::SessionError> {
            let mut store = SessionStore::open(path)?;
            store.write_session(self.recorder.session())
        };
        persist().map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to write session");
            LocoError::Persistence(e.to_string())
        })?;
        info!(path = %path.display(), records = self.recorder.len(), "session trace written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::AffinePolicy;
    use loco_hal::sim::SimBus;
    use loco_middleware::FixedCommand;
    use loco_perception::transform::Quaternion;
    use loco_types::NUM_JOINTS;

    fn test_config() -> ControlConfig {
        ControlConfig {
            settle_delay_ms: 0,
            control_frequency_hz: 500.0,
            max_orientation_age_ms: 0,
            ..Default::default()
        }
    }

    fn published() -> Arc<LatestOrientation> {
        let cell = Arc::new(LatestOrientation::new());
        cell.publish(Quaternion::identity());
        cell
    }

    fn zero_policy() -> PolicyAdapter {
        PolicyAdapter::direct(Box::new(AffinePolicy::zeros(OBSERVATION_LEN, NUM_JOINTS))).unwrap()
    }

    #[test]
    fn start_enables_bus_and_sets_gains() {
        let cfg = test_config();
        let bus = SimBus::new().with_pose(cfg.rest_pose).build();
        let mut cl = ControlLoop::new(cfg.clone(), bus, published(), zero_policy()).unwrap();
        assert_eq!(cl.state(), LoopState::Idle);
        cl.start().unwrap();
        assert_eq!(cl.state(), LoopState::Running);
        assert!(cl.bus().is_enabled());
        assert_eq!(cl.bus().gains(), Some(cfg.pid));
        assert!(cl.start().is_err());
    }

    #[test]
    fn start_failure_stops_the_loop() {
        let mut cl =
            ControlLoop::new(test_config(), loco_hal::ServoBus::new(), published(), zero_policy()).unwrap();
        assert!(matches!(cl.start(), Err(LocoError::HardwareFault { .. })));
        assert_eq!(cl.state(), LoopState::Stopped);
    }

    #[test]
    fn prev_action_is_raw_policy_output() {
        let cfg = test_config();
        let bias = vec![1.0; NUM_JOINTS];
        let engine = AffinePolicy::new(vec![vec![0.0; OBSERVATION_LEN]; NUM_JOINTS], bias).unwrap();
        let policy = PolicyAdapter::direct(Box::new(engine)).unwrap();
        let bus = SimBus::new().with_pose(cfg.rest_pose).build();
        let mut cl = ControlLoop::new(cfg, bus, published(), policy).unwrap();
        cl.start().unwrap();

        cl.step().unwrap();
        assert_eq!(*cl.prev_action(), JointVector::from_fn(|_| 1.0));
        cl.step().unwrap();
        let second = &cl.recorder().session().records[1].observation;
        assert!(second[36..51].iter().all(|v| *v == 1.0));
    }

    #[test]
    fn commands_are_scaled_and_used_from_next_iteration() {
        let cfg = test_config();
        let bus = SimBus::new().with_pose(cfg.rest_pose).build();
        let mut cl = ControlLoop::new(cfg, bus, published(), zero_policy())
            .unwrap()
            .with_commands(Box::new(FixedCommand::new(Command::new(0.5, 0.1, 1.0))));
        cl.start().unwrap();

        cl.step().unwrap();
        cl.step().unwrap();
        let records = &cl.recorder().session().records;
        assert_eq!(&records[0].observation[3..6], &[0.0, 0.0, 0.0]);
        assert_eq!(&records[1].observation[3..6], &[1.0, 0.2, 0.25]);
    }

    #[test]
    fn only_actuated_joints_are_commanded() {
        let cfg = test_config();
        let bus = SimBus::new().with_pose(cfg.rest_pose).build();
        let mut cl = ControlLoop::new(cfg, bus, published(), zero_policy()).unwrap();
        cl.start().unwrap();
        cl.step().unwrap();
        let targets = cl.bus().last_targets().unwrap();
        assert_eq!(targets.len(), loco_types::NUM_ACTUATED);
        assert!(!targets.contains_key("left_antenna"));
    }

    #[test]
    fn pacer_reports_overrun_without_sleeping() {
        let pacer = Pacer::new(Duration::from_millis(5));
        let started = Instant::now() - Duration::from_millis(20);
        let before = Instant::now();
        assert!(pacer.pace(started));
        assert!(before.elapsed() < Duration::from_millis(5));

        assert!(!pacer.pace(Instant::now()));
    }

    #[test]
    fn stats_mean_period() {
        let mut stats = LoopStats::default();
        assert_eq!(stats.mean_period(), None);
        stats.record(Duration::from_millis(10), false);
        stats.record(Duration::from_millis(30), true);
        let mean = stats.mean_period().unwrap();
        assert!((mean.as_secs_f64() - 0.02).abs() < 1e-9);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.max_period, Duration::from_millis(30));
    }

    #[test]
    fn stats_mean_period_survives_huge_iteration_counts() {
        let stats = LoopStats {
            iterations: 1 << 32,
            total_period: Duration::from_secs(1 << 32),
            ..Default::default()
        };
        let mean = stats.mean_period().unwrap();
        assert!((mean.as_secs_f64() - 1.0).abs() < 1e-9);
        assert!((stats.mean_frequency_hz().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn new_rejects_a_frequency_without_a_period() {
        let cfg = ControlConfig {
            control_frequency_hz: 1e-20,
            ..test_config()
        };
        let bus = SimBus::new().with_pose(cfg.rest_pose).build();
        let built = ControlLoop::new(cfg, bus, published(), zero_policy());
        assert!(matches!(built.err(), Some(LocoError::Config(_))));
    }

    #[test]
    fn stop_reason_display() {
        assert_eq!(StopReason::Requested.to_string(), "stop requested");
        assert!(StopReason::Fatal(LocoError::NoOrientation).to_string().starts_with("fatal"));
    }
}
