use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::log::LogLevel;
use crate::{plog_debug, Error, Result};

const DEFAULT_REQUESTS: usize = 4;
const DEFAULT_HOST_THREADS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Defaults for `phasegate simulate`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationConfig {
    #[serde(default = "default_requests")]
    pub requests: usize,
    #[serde(default = "default_host_threads")]
    pub host_threads: usize,
}

fn default_requests() -> usize {
    DEFAULT_REQUESTS
}

fn default_host_threads() -> usize {
    DEFAULT_HOST_THREADS
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: DEFAULT_REQUESTS,
            host_threads: DEFAULT_HOST_THREADS,
        }
    }
}

impl Config {
    pub fn phasegate_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".phasegate"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::phasegate_dir()?.join("phasegate.toml"))
    }

    pub fn effective_log_path(&self) -> Result<PathBuf> {
        match &self.log_file {
            Some(file) => Ok(expand_tilde(file)),
            None => Ok(Self::phasegate_dir()?.join("phasegate.log")),
        }
    }

    /// Explicit log level, if one is configured and parses.
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(|l| l.parse().ok())
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        plog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            plog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        plog_debug!(
            "Config loaded: debug={}, log_file={:?}, log_level={:?}, requests={}, host_threads={}",
            config.debug,
            config.log_file,
            config.log_level,
            config.simulation.requests,
            config.simulation.host_threads
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                plog_debug!("Creating config directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        plog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(level) = &self.log_level {
            level.parse::<LogLevel>()?;
        }
        if self.simulation.host_threads == 0 {
            return Err(Error::Validation(
                "simulation.host_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
