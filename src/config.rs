use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

pub const DEFAULT_MAX_BACKGROUND_CONCURRENCY: usize = 4;
pub const MAX_BACKGROUND_CONCURRENCY: usize = 4096;
pub const DEFAULT_WAVE_TIMEOUT_SECS: f64 = 30.0;
/// Upper bound for `background_wave_timeout_secs` (one year).
pub const MAX_WAVE_TIMEOUT_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrent tasks in flight at once.
    pub max_background_concurrency: usize,
    /// Reject unknown dependency ids and cycles instead of dropping the edges.
    pub strict_dependency_check: bool,
    /// Wall-clock budget for the concurrent part of each wave.
    pub background_wave_timeout_secs: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_background_concurrency: DEFAULT_MAX_BACKGROUND_CONCURRENCY,
            strict_dependency_check: true,
            background_wave_timeout_secs: DEFAULT_WAVE_TIMEOUT_SECS,
        }
    }
}

impl OrchestratorConfig {
    pub fn taskwave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskwave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskwave_dir()?.join("taskwave.toml"))
    }

    pub fn state_path() -> Result<PathBuf> {
        Ok(Self::taskwave_dir()?.join("completed.json"))
    }

    pub fn with_max_background_concurrency(mut self, max: usize) -> Self {
        self.max_background_concurrency = max;
        self
    }

    pub fn with_strict_dependency_check(mut self, strict: bool) -> Self {
        self.strict_dependency_check = strict;
        self
    }

    pub fn with_background_wave_timeout_secs(mut self, secs: f64) -> Self {
        self.background_wave_timeout_secs = secs;
        self
    }

    /// The wave deadline, clamped to `MAX_WAVE_TIMEOUT_SECS`.
    ///
    /// Out-of-range values that skipped `validate` fall back to the default.
    pub fn wave_timeout(&self) -> Duration {
        let fallback = Duration::from_secs_f64(DEFAULT_WAVE_TIMEOUT_SECS);
        let secs = self.background_wave_timeout_secs;
        if secs.is_nan() {
            return fallback;
        }
        Duration::try_from_secs_f64(secs.min(MAX_WAVE_TIMEOUT_SECS))
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(fallback)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_background_concurrency == 0 {
            return Err(Error::Validation(
                "max_background_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_background_concurrency > MAX_BACKGROUND_CONCURRENCY {
            return Err(Error::Validation(format!(
                "max_background_concurrency must be at most {}, got {}",
                MAX_BACKGROUND_CONCURRENCY, self.max_background_concurrency
            )));
        }
        let timeout = self.background_wave_timeout_secs;
        let representable = Duration::try_from_secs_f64(timeout).is_ok_and(|d| !d.is_zero());
        if !representable {
            return Err(Error::Validation(format!(
                "background_wave_timeout_secs must be a positive, representable number of seconds, got {}",
                timeout
            )));
        }
        if timeout > MAX_WAVE_TIMEOUT_SECS {
            return Err(Error::Validation(format!(
                "background_wave_timeout_secs must be at most {}, got {}",
                MAX_WAVE_TIMEOUT_SECS, timeout
            )));
        }
        Ok(())
    }

    /// Load from `~/.taskwave/taskwave.toml`, or defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("OrchestratorConfig::load path={}", path.display());
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            "Config loaded: max_background_concurrency={}, strict={}, wave_timeout={}s",
            config.max_background_concurrency,
            config.strict_dependency_check,
            config.background_wave_timeout_secs
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }
}
