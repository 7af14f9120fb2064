//! Configuration file format and merging with command line options.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use powertimer_core::RetentionPolicy;

use crate::host::PowerCommands;
use crate::scheduler::PowerSchedulerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "powertimerd.toml";
pub const DEFAULT_TIMER_FILE: &str = "pm_timers.json";
pub const DEFAULT_WAKEUP_FLAG: &str = "/proc/stb/fp/was_timer_wakeup";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
pub const DEFAULT_STATUS_POLL_SECS: u64 = 5;

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub timers: TimersSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub power: PowerSection,
    #[serde(default)]
    pub standby: StandbySection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub status: StatusSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct TimersSection {
    pub path: Option<String>,
    pub keep_days: Option<u32>,
    pub max_processed: Option<usize>,
    pub save_logs: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SchedulerSection {
    pub max_poll_secs: Option<u64>,
    pub startup_standby_delay_secs: Option<u64>,
    pub shutdown_check_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PowerSection {
    pub wake_command: Option<String>,
    pub standby_command: Option<String>,
    pub deep_standby_command: Option<String>,
    pub reboot_command: Option<String>,
    pub restart_command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StandbySection {
    /// Empty string disables the check.
    pub timer_wakeup_flag: Option<String>,
}

/// Status file written by the recording service and the front panel.
#[derive(Debug, Deserialize, Default)]
pub struct StatusSection {
    pub path: Option<String>,
    pub poll_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Options given on the command line; they take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub timer_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_retention_days: Option<u64>,
}

/// Effective settings after merging.
#[derive(Debug, Clone)]
pub struct Settings {
    pub timer_file: PathBuf,
    pub retention: RetentionPolicy,
    pub save_logs: bool,
    pub scheduler: PowerSchedulerConfig,
    pub commands: PowerCommands,
    pub timer_wakeup_flag: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub status_poll_secs: u64,
    pub log_dir: PathBuf,
    pub log_retention_days: u64,
    pub log_level: Option<String>,
}

impl Settings {
    pub fn resolve(cli: &CliOverrides, file: ConfigFile) -> Self {
        let defaults = PowerSchedulerConfig::default();
        let retention_defaults = RetentionPolicy::default();

        let timer_wakeup_flag = match file.standby.timer_wakeup_flag {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_WAKEUP_FLAG)),
        };

        Self {
            timer_file: cli
                .timer_file
                .clone()
                .or_else(|| file.timers.path.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TIMER_FILE)),
            retention: RetentionPolicy {
                keep_days: file.timers.keep_days.or(retention_defaults.keep_days),
                max_processed: file.timers.max_processed.or(retention_defaults.max_processed),
            },
            save_logs: file.timers.save_logs.unwrap_or(true),
            scheduler: PowerSchedulerConfig {
                max_poll_secs: file.scheduler.max_poll_secs.unwrap_or(defaults.max_poll_secs),
                startup_standby_delay_secs: file
                    .scheduler
                    .startup_standby_delay_secs
                    .unwrap_or(defaults.startup_standby_delay_secs),
                shutdown_check_delay_secs: file
                    .scheduler
                    .shutdown_check_delay_secs
                    .unwrap_or(defaults.shutdown_check_delay_secs),
            },
            commands: PowerCommands {
                wake: file.power.wake_command,
                standby: file.power.standby_command,
                deep_standby: file.power.deep_standby_command,
                reboot: file.power.reboot_command,
                restart: file.power.restart_command,
            },
            timer_wakeup_flag,
            status_file: file
                .status
                .path
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            status_poll_secs: file.status.poll_secs.unwrap_or(DEFAULT_STATUS_POLL_SECS).max(1),
            log_dir: cli
                .log_dir
                .clone()
                .or_else(|| file.logging.log_dir.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_retention_days: cli
                .log_retention_days
                .or(file.logging.retention_days)
                .unwrap_or(DEFAULT_LOG_RETENTION_DAYS),
            log_level: file.logging.level,
        }
    }
}
