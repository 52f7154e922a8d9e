//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::machine::Timings;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Lock timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Seconds without input before a detector paused by input resumes.
    #[serde(default = "default_no_input_active_delay")]
    pub no_input_active_delay_seconds: u64,
    /// Seconds of continuous absence before the warning countdown.
    #[serde(default = "default_no_person_detected_delay")]
    pub no_person_detected_delay_seconds: u64,
    /// Seconds the countdown runs before locking.
    #[serde(default = "default_popup_timeout")]
    pub popup_timeout_seconds: u64,
    /// Milliseconds after the last motion during which the person counts as present.
    #[serde(default = "default_presence_grace_ms")]
    pub presence_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            no_input_active_delay_seconds: default_no_input_active_delay(),
            no_person_detected_delay_seconds: default_no_person_detected_delay(),
            popup_timeout_seconds: default_popup_timeout(),
            presence_grace_ms: default_presence_grace_ms(),
        }
    }
}

impl TimingConfig {
    pub fn timings(&self) -> Timings {
        Timings {
            no_input_active_delay: Duration::from_secs(self.no_input_active_delay_seconds),
            no_person_detected_delay: Duration::from_secs(self.no_person_detected_delay_seconds),
            popup_timeout: Duration::from_secs(self.popup_timeout_seconds),
            presence_grace: Duration::from_millis(self.presence_grace_ms),
        }
    }
}

/// Input activity monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Poll interval in milliseconds.
    #[serde(default = "default_input_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_input_poll_interval_ms(),
        }
    }
}

impl InputConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Power and session monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Poll interval in seconds.
    #[serde(default = "default_system_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Pause detection while running on battery.
    #[serde(default = "default_battery_pause")]
    pub battery_pause: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_system_poll_interval(),
            battery_pause: default_battery_pause(),
        }
    }
}

impl SystemConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Presence detector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detector program and arguments. Empty runs on input activity alone.
    #[serde(default)]
    pub command: Vec<String>,
    /// Keep the camera feed running while paused.
    #[serde(default)]
    pub force_camera_feed: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Data directory for the event journal.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Returns the journal directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

// Default value functions
fn default_no_input_active_delay() -> u64 {
    5
}

fn default_no_person_detected_delay() -> u64 {
    5
}

fn default_popup_timeout() -> u64 {
    5
}

fn default_presence_grace_ms() -> u64 {
    2000
}

fn default_input_poll_interval_ms() -> u64 {
    500
}

fn default_system_poll_interval() -> u64 {
    5
}

fn default_battery_pause() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".awaylock"))
        .unwrap_or_else(|| PathBuf::from(".awaylock"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            let default_paths = [
                PathBuf::from("config/default.toml"),
                dirs::config_dir()
                    .map(|d| d.join("awaylock/config.toml"))
                    .unwrap_or_default(),
            ];

            let mut loaded = None;
            for path in &default_paths {
                if path.is_file() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.logging.data_dir = expand_tilde(&config.logging.data_dir);

        Ok(config)
    }

    /// Apply `AWAYLOCK_*` overrides read through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = number("AWAYLOCK_NO_INPUT_ACTIVE_DELAY") {
            self.timing.no_input_active_delay_seconds = v;
        }
        if let Some(v) = number("AWAYLOCK_NO_PERSON_DETECTED_DELAY") {
            self.timing.no_person_detected_delay_seconds = v;
        }
        if let Some(v) = number("AWAYLOCK_POPUP_TIMEOUT") {
            self.timing.popup_timeout_seconds = v;
        }
        if let Some(val) = lookup("AWAYLOCK_BATTERY_PAUSE") {
            if let Ok(v) = val.trim().parse() {
                self.system.battery_pause = v;
            }
        }
        if let Some(val) = lookup("AWAYLOCK_DETECTOR") {
            self.detector.command = val.split_whitespace().map(str::to_string).collect();
        }
        if let Some(val) = lookup("AWAYLOCK_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("AWAYLOCK_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.timing.no_input_active_delay_seconds == 0 {
            anyhow::bail!("No-input delay must be greater than 0");
        }
        if self.timing.no_person_detected_delay_seconds == 0 {
            anyhow::bail!("No-person delay must be greater than 0");
        }
        if self.timing.popup_timeout_seconds == 0 {
            anyhow::bail!("Popup timeout must be greater than 0");
        }
        if self.input.poll_interval_ms == 0 {
            anyhow::bail!("Input poll interval must be greater than 0");
        }
        if self.system.poll_interval_seconds == 0 {
            anyhow::bail!("System poll interval must be greater than 0");
        }
        if self
            .detector
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            anyhow::bail!("Detector program name cannot be empty");
        }
        Ok(())
    }
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_match_machine_defaults() {
        let config = Config::default();
        assert_ok!(config.validate());
        assert_eq!(config.timing.timings(), Timings::default());
        assert!(config.detector.command.is_empty());
        assert!(config.system.battery_pause);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[timing]
popup_timeout_seconds = 15

[detector]
command = ["python3", "detect.py", "--camera", "0"]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.timing.popup_timeout_seconds, 15);
        assert_eq!(config.timing.no_person_detected_delay_seconds, 5);
        assert_eq!(config.detector.command.len(), 4);
        assert_eq!(config.input.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing\npopup_timeout_seconds = ").unwrap();
        assert_err!(Config::from_file(file.path()));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AWAYLOCK_POPUP_TIMEOUT", "30"),
            ("AWAYLOCK_NO_PERSON_DETECTED_DELAY", "not-a-number"),
            ("AWAYLOCK_BATTERY_PAUSE", "false"),
            ("AWAYLOCK_DETECTOR", "detect --fast"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.timing.popup_timeout_seconds, 30);
        assert_eq!(config.timing.no_person_detected_delay_seconds, 5);
        assert!(!config.system.battery_pause);
        assert_eq!(config.detector.command, vec!["detect", "--fast"]);
    }

    #[test]
    fn test_validate_rejects_zero_delays() {
        let mut config = Config::default();
        config.timing.popup_timeout_seconds = 0;
        assert_err!(config.validate());

        let mut config = Config::default();
        config.detector.command = vec![" ".to_string()];
        assert_err!(config.validate());
    }

    #[test]
    fn test_expand_tilde() {
        let plain = PathBuf::from("/var/lib/awaylock");
        assert_eq!(expand_tilde(&plain), plain);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.awaylock")), home.join(".awaylock"));
        }
    }
}
