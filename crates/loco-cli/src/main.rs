//! `loco` – legged-robot locomotion controller.
//!
//! Subcommands:
//!
//! - `run` – bring up the servos, start the orientation sampler and drive
//!   the control loop until Ctrl-C (or `--iterations`), then write the
//!   session trace.
//! - `inspect <file>` – summarise (or dump) a session artifact.
//! - `imu-check` – run the orientation sampler alone and print the corrected
//!   Euler angles.
//! - `init` – write a default config file.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::Colorize;
use loco_hal::sim::{SimBus, SimImu};
use loco_memory::SessionStore;
use loco_middleware::CommandClient;
use loco_perception::orientation::LatestOrientation;
use loco_perception::sampler::OrientationSampler;
use loco_runtime::observation::OBSERVATION_LEN;
use loco_runtime::{AffinePolicy, ControlLoop, PolicyAdapter, StopReason};
use loco_types::{LocoError, NUM_JOINTS};
use tracing::{info, warn};

use crate::config::{Backend, Config};

#[derive(Parser, Debug)]
#[command(name = "loco")]
#[command(about = "Real-time locomotion controller for a small bipedal robot")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.loco/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop
    Run {
        /// Stop after this many iterations
        #[arg(long)]
        iterations: Option<u64>,

        /// Policy weights (overrides `policy_path`)
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Session artifact (overrides `session_path`)
        #[arg(long)]
        session: Option<PathBuf>,

        /// Control frequency in Hz (overrides `control.control_frequency_hz`)
        #[arg(short = 'c', long)]
        control_freq: Option<f32>,
    },
    /// Summarise a session artifact
    Inspect {
        path: PathBuf,

        /// Print every record of the latest session as JSON lines
        #[arg(long)]
        dump: bool,
    },
    /// Print corrected IMU orientation
    ImuCheck {
        /// Print rate in Hz
        #[arg(long, default_value_t = 30.0)]
        rate: f32,

        /// Stop after this many lines
        #[arg(long)]
        samples: Option<u64>,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let _guard = loco_runtime::telemetry::init_tracing("loco");

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let result = match cli.command {
        Command::Init { force } => init(&config_path, force),
        Command::Inspect { path, dump } => inspect(&path, dump),
        command => config::load_or_default(&config_path)
            .map_err(LocoError::Config)
            .and_then(|cfg| match command {
                Command::Run {
                    iterations,
                    policy,
                    session,
                    control_freq,
                } => {
                    let mut cfg = cfg;
                    if policy.is_some() {
                        cfg.policy_path = policy;
                    }
                    if let Some(session) = session {
                        cfg.session_path = session;
                    }
                    if let Some(hz) = control_freq {
                        cfg.control.control_frequency_hz = hz;
                    }
                    run(cfg, iterations)
                }
                Command::ImuCheck { rate, samples } => imu_check(&cfg, rate, samples),
                Command::Init { .. } | Command::Inspect { .. } => Ok(()),
            }),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run(cfg: Config, iterations: Option<u64>) -> Result<(), LocoError> {
    cfg.control.validate()?;
    print_banner(&cfg);

    let shutdown = install_ctrlc_handler();

    let orientation = Arc::new(LatestOrientation::new());
    let (bus, imu) = match cfg.backend {
        Backend::Sim => (SimBus::new().with_pose(cfg.control.rest_pose).build(), SimImu::new()),
    };
    let sampler = OrientationSampler::spawn(imu, cfg.control.sampler_config()?, Arc::clone(&orientation))?;
    if !wait_for_orientation(&orientation, Duration::from_secs(1)) {
        warn!("no orientation sample yet, the first iteration may stop the loop");
    }

    let policy = build_policy(&cfg)?;
    let mut control = ControlLoop::new(cfg.control.clone(), bus, orientation, policy)?
        .with_session_path(&cfg.session_path);
    if cfg.commands.enabled {
        let client = CommandClient::connect(cfg.commands.url.clone())?;
        control = control.with_commands(Box::new(client));
    }

    let report = control.run(&shutdown, iterations);
    let sampler_stats = sampler.stop();
    info!(
        published = sampler_stats.published,
        failures = sampler_stats.failures,
        "orientation sampler stopped"
    );
    let report = report?;

    println!();
    println!("  {} {}", "Session".bold(), report.session_id);
    println!("  Stop reason : {}", report.stop_reason);
    println!("  Iterations  : {}", report.stats.iterations);
    println!("  Overruns    : {}", report.stats.overruns);
    if let Some(hz) = report.stats.mean_frequency_hz() {
        println!("  Mean rate   : {hz:.1} Hz");
    }
    if let Some(path) = &report.artifact {
        println!("  Trace       : {}", path.display().to_string().bold());
    }

    match report.stop_reason {
        StopReason::Fatal(e) => Err(e),
        _ => Ok(()),
    }
}

fn build_policy(cfg: &Config) -> Result<PolicyAdapter, LocoError> {
    let policy = match &cfg.policy_path {
        Some(path) => {
            info!(path = %path.display(), "loading policy");
            AffinePolicy::load(path)?
        }
        None if cfg.rma.enabled => {
            return Err(LocoError::Config("rma.enabled requires policy_path".into()));
        }
        None => {
            warn!("no policy_path configured, holding the rest pose");
            AffinePolicy::zeros(OBSERVATION_LEN, NUM_JOINTS)
        }
    };

    if cfg.rma.enabled {
        let path = cfg.rma.adaptation_module_path.as_ref().ok_or_else(|| {
            LocoError::Config("rma.enabled requires rma.adaptation_module_path".into())
        })?;
        info!(path = %path.display(), "loading adaptation module");
        let adaptation = AffinePolicy::load(path)?;
        PolicyAdapter::adaptive(
            Box::new(policy),
            Box::new(adaptation),
            cfg.control.observation_history_len,
        )
    } else {
        PolicyAdapter::direct(Box::new(policy))
    }
}

fn install_ctrlc_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this iteration …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the loop can only stop on error or --iterations");
    }
    shutdown
}

fn wait_for_orientation(cell: &LatestOrientation, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while cell.latest().is_none() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// inspect
// ─────────────────────────────────────────────────────────────────────────────

fn inspect(path: &Path, dump: bool) -> Result<(), LocoError> {
    if !path.exists() {
        return Err(LocoError::Persistence(format!("{} does not exist", path.display())));
    }
    let store = SessionStore::open(path).map_err(|e| LocoError::Persistence(e.to_string()))?;
    let sessions = store
        .list_sessions()
        .map_err(|e| LocoError::Persistence(e.to_string()))?;

    if !dump {
        println!("  {} session(s) in {}", sessions.len(), path.display().to_string().bold());
        for s in &sessions {
            println!(
                "  {}  {}  {:>6} records  {}",
                s.id.to_string().cyan(),
                s.started_at.format("%Y-%m-%d %H:%M:%S"),
                s.record_count,
                s.stop_reason.as_deref().unwrap_or("-").dimmed()
            );
        }
        return Ok(());
    }

    let session = store
        .latest_session()
        .map_err(|e| LocoError::Persistence(e.to_string()))?;
    if let Some(session) = session {
        for record in &session.records {
            let line = serde_json::to_string(record)
                .map_err(|e| LocoError::Persistence(e.to_string()))?;
            println!("{line}");
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// imu-check
// ─────────────────────────────────────────────────────────────────────────────

fn imu_check(cfg: &Config, rate: f32, samples: Option<u64>) -> Result<(), LocoError> {
    let period = loco_types::period_from_hz(rate)?;
    let shutdown = install_ctrlc_handler();
    let cell = Arc::new(LatestOrientation::new());
    let imu = match cfg.backend {
        Backend::Sim => SimImu::new(),
    };
    let sampler = OrientationSampler::spawn(imu, cfg.control.sampler_config()?, Arc::clone(&cell))?;

    let mut printed = 0;
    while !shutdown.load(Ordering::SeqCst) && samples.is_none_or(|n| printed < n) {
        if let Some(sample) = cell.latest() {
            let e = sample.quaternion.to_euler();
            println!(
                "  roll {:>7.2}°  pitch {:>7.2}°  yaw {:>7.2}°  (#{})",
                e.x.to_degrees(),
                e.y.to_degrees(),
                e.z.to_degrees(),
                sample.sequence
            );
            printed += 1;
        }
        thread::sleep(period);
    }

    let stats = sampler.stop();
    info!(published = stats.published, failures = stats.failures, "imu check finished");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

fn init(path: &Path, force: bool) -> Result<(), LocoError> {
    if path.exists() && !force {
        return Err(LocoError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config::save_to(&Config::default(), path).map_err(LocoError::Config)?;
    println!("  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &Config) {
    println!();
    println!("{}", r#"   __                  "#.bold().cyan());
    println!("{}", r#"  / /  ___  _______  ___ "#.bold().cyan());
    println!("{}", r#" / /__/ _ \/ __/ _ \/ _ \"#.bold().cyan());
    println!("{}", r#"/____/\___/\__/\___/\___/"#.bold().cyan());
    println!();
    println!(
        "  backend {}  ·  {} Hz  ·  policy {}  ·  rma {}  ·  commands {}",
        cfg.backend.to_string().bold(),
        cfg.control.control_frequency_hz,
        cfg.policy_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<rest pose>".into())
            .bold(),
        if cfg.rma.enabled { "on".green() } else { "off".dimmed() },
        if cfg.commands.enabled { cfg.commands.url.as_str().green() } else { "off".dimmed() },
    );
    println!();
}
