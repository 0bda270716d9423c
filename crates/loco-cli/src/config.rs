//! Controller configuration – reads/writes `~/.loco/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use loco_runtime::ControlConfig;
use serde::{Deserialize, Serialize};

/// Hardware backend the controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Simulated servos and IMU.
    #[default]
    Sim,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sim => write!(f, "sim"),
        }
    }
}

/// Adaptation-module settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RmaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptation_module_path: Option<PathBuf>,
}

/// External velocity command settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// WebSocket URL of the command server.
    #[serde(default = "default_commands_url")]
    pub url: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_commands_url(),
        }
    }
}

/// Persisted configuration stored in `~/.loco/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON weights for the locomotion policy.  Without one the controller
    /// holds the rest pose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,

    /// SQLite file receiving the session trace.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub rma: RmaConfig,

    #[serde(default)]
    pub commands: CommandsConfig,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("loco_session.db")
}
fn default_commands_url() -> String {
    "ws://localhost:9090".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy_path: None,
            session_path: default_session_path(),
            backend: Backend::default(),
            control: ControlConfig::default(),
            rma: RmaConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

/// Return the path to `~/.loco/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".loco").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Load `path` (defaults when absent) and apply environment overrides.
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `LOCO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOCO_POLICY_PATH` | `policy_path` |
/// | `LOCO_SESSION_PATH` | `session_path` |
/// | `LOCO_COMMANDS_URL` | `commands.url` |
/// | `LOCO_CONTROL_FREQUENCY_HZ` | `control.control_frequency_hz` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LOCO_POLICY_PATH") {
        cfg.policy_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("LOCO_SESSION_PATH") {
        cfg.session_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("LOCO_COMMANDS_URL") {
        cfg.commands.url = v;
    }
    if let Ok(v) = std::env::var("LOCO_CONTROL_FREQUENCY_HZ")
        && let Ok(hz) = v.parse::<f32>()
        && hz.is_finite()
        && hz > 0.0
    {
        cfg.control.control_frequency_hz = hz;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loco_types::PidGains;

    #[test]
    fn config_path_points_to_loco_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".loco"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
policy_path = "/opt/policies/walk.json"

[control]
control_frequency_hz = 50.0
pitch_bias_deg = -3.5

[control.pid]
p = 900.0
i = 0.0
d = 300.0

[rma]
enabled = true
adaptation_module_path = "/opt/policies/adapt.json"
"#,
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.policy_path, Some(PathBuf::from("/opt/policies/walk.json")));
        assert_eq!(cfg.control.control_frequency_hz, 50.0);
        assert_eq!(cfg.control.pitch_bias_deg, -3.5);
        assert_eq!(cfg.control.pid, PidGains::new(900.0, 0.0, 300.0));
        assert_eq!(cfg.control.action_scale, 0.25);
        assert!(cfg.rma.enabled);
        assert!(!cfg.commands.enabled);
        assert_eq!(cfg.backend, Backend::Sim);
        assert_eq!(cfg.session_path, PathBuf::from("loco_session.db"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "backend = \"dynamixel\"\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    // Env-var tests each use their own variable so they can run in parallel.

    #[test]
    fn env_overrides_policy_path() {
        // SAFETY: only this test reads or writes LOCO_POLICY_PATH.
        unsafe { std::env::set_var("LOCO_POLICY_PATH", "/tmp/policy.json") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.policy_path, Some(PathBuf::from("/tmp/policy.json")));
        unsafe { std::env::remove_var("LOCO_POLICY_PATH") };
    }

    #[test]
    fn env_overrides_commands_url() {
        // SAFETY: only this test reads or writes LOCO_COMMANDS_URL.
        unsafe { std::env::set_var("LOCO_COMMANDS_URL", "ws://robot:9090") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.commands.url, "ws://robot:9090");
        unsafe { std::env::remove_var("LOCO_COMMANDS_URL") };
    }

    #[test]
    fn env_override_ignores_invalid_frequency() {
        // SAFETY: only this test reads or writes LOCO_CONTROL_FREQUENCY_HZ.
        unsafe { std::env::set_var("LOCO_CONTROL_FREQUENCY_HZ", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.control_frequency_hz, 30.0);

        unsafe { std::env::set_var("LOCO_CONTROL_FREQUENCY_HZ", "60") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.control_frequency_hz, 60.0);
        unsafe { std::env::remove_var("LOCO_CONTROL_FREQUENCY_HZ") };
    }
}
