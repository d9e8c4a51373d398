//! naptime configuration loading and parsing

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/naptime/config.toml";
pub const CONFIG_ENV: &str = "NAPTIME_CONFIG";

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct NaptimeConfig {
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

/// Defaults for `naptime nap` when the quanta are not given on the command line
#[derive(Debug, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_nap_quantum")]
    pub nap_quantum_secs: f64,
    #[serde(default)]
    pub wake_quantum_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            nap_quantum_secs: default_nap_quantum(),
            wake_quantum_secs: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// External tools naptime shells out to
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_ps")]
    pub ps: String,
    #[serde(default = "default_lsof")]
    pub lsof: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ps: default_ps(),
            lsof: default_lsof(),
        }
    }
}

fn default_nap_quantum() -> f64 { 0.3 }
fn default_log_level() -> String { "info".into() }
fn default_ps() -> String { "ps".into() }
fn default_lsof() -> String { "lsof".into() }

/// Where to read configuration from: `path`, $NAPTIME_CONFIG, or
/// /etc/naptime/config.toml.
pub fn config_path(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
    }
}

/// Load configuration from `config_path`. `None` when the file does not exist.
pub fn load_config(config_path: &Path) -> Result<Option<NaptimeConfig>> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    let config: NaptimeConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;
    Ok(Some(config))
}
