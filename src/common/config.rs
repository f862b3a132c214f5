//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Environment variable that overrides the launcher program
pub const PROGRAM_ENV: &str = "DEBUG_HARNESS_PROGRAM";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// How the target is launched
    #[serde(default)]
    pub launcher: LauncherConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Program used to run target scripts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LauncherConfig {
    /// Debugger (or runtime) executable, resolved through PATH if bare
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Arguments placed before the script path
    #[serde(default = "default_launcher_args")]
    pub args: Vec<String>,

    /// Arguments placed after the script path
    #[serde(default)]
    pub script_args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_launcher_args(),
            script_args: Vec::new(),
        }
    }
}

fn default_program() -> PathBuf {
    PathBuf::from("lldb")
}

fn default_launcher_args() -> Vec<String> {
    vec!["--".to_string(), "node".to_string()]
}

/// Session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Regex that marks the target as stopped and ready for commands
    #[serde(default = "default_break_pattern")]
    pub break_pattern: String,

    /// Commands written right after the target is spawned
    #[serde(default = "default_startup_commands")]
    pub startup_commands: Vec<String>,

    /// Commands written (best effort) before the target is terminated
    #[serde(default = "default_quit_commands")]
    pub quit_commands: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            break_pattern: default_break_pattern(),
            startup_commands: default_startup_commands(),
            quit_commands: default_quit_commands(),
        }
    }
}

fn default_break_pattern() -> String {
    r"Process \d+ stopped".to_string()
}

fn default_startup_commands() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_quit_commands() -> Vec<String> {
    vec!["kill".to_string(), "quit".to_string()]
}

/// Timeout settings in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    /// Default timeout for a wait
    #[serde(default = "default_wait")]
    pub wait_ms: u64,

    /// Time between SIGTERM and a forced kill
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,

    /// How long buffered output is still dispatched after the target exits
    #[serde(default = "default_exit_drain")]
    pub exit_drain_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wait_ms: default_wait(),
            terminate_grace_ms: default_terminate_grace(),
            exit_drain_ms: default_exit_drain(),
        }
    }
}

fn default_wait() -> u64 {
    10_000
}
fn default_terminate_grace() -> u64 {
    2_000
}
fn default_exit_drain() -> u64 {
    200
}

impl Timeouts {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.exit_drain_ms)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist. The launcher
    /// program can be overridden with `DEBUG_HARNESS_PROGRAM`.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                Self::parse(&content)?
            }
            _ => Self::default(),
        };

        if let Some(program) = std::env::var_os(PROGRAM_ENV) {
            if !program.is_empty() {
                config.launcher.program = PathBuf::from(program);
            }
        }

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Config(e.to_string()))
    }
}
