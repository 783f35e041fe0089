use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    DEFAULT_DETECTION_INTERVAL, DEFAULT_DOMINANCE_PERCENT, DEFAULT_FRAME_RATE_HZ,
    DEFAULT_MATCH_THRESHOLD, DEFAULT_REGISTRATION_COOLDOWN, DEFAULT_WINDOW_HORIZON,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the detection loop. Every field has a default, so a config
/// file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Unset means the descriptor model's recommendation, else
    /// `DEFAULT_MATCH_THRESHOLD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_threshold: Option<f64>,
    pub registration_cooldown_ms: u64,
    pub detection_interval_ms: u64,
    pub window_horizon_ms: u64,
    pub dominance_percent: f64,
    pub frame_rate_hz: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            match_threshold: None,
            registration_cooldown_ms: DEFAULT_REGISTRATION_COOLDOWN.as_millis() as u64,
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL.as_millis() as u64,
            window_horizon_ms: DEFAULT_WINDOW_HORIZON.as_millis() as u64,
            dominance_percent: DEFAULT_DOMINANCE_PERCENT,
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
        }
    }
}

impl DetectionConfig {
    /// Platform config location, e.g. `~/.config/CrowdSight/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("CrowdSight").join("config.json"))
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(threshold) = self.match_threshold {
            if !(threshold > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "match_threshold must be positive, got {threshold}"
                )));
            }
        }
        if self.detection_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detection_interval_ms must be positive".into(),
            ));
        }
        if self.window_horizon_ms == 0 {
            return Err(ConfigError::Invalid(
                "window_horizon_ms must be positive".into(),
            ));
        }
        if !(self.dominance_percent > 0.0 && self.dominance_percent <= 100.0) {
            return Err(ConfigError::Invalid(format!(
                "dominance_percent must be in (0, 100], got {}",
                self.dominance_percent
            )));
        }
        if self.frame_rate_hz == 0 {
            return Err(ConfigError::Invalid("frame_rate_hz must be positive".into()));
        }
        Ok(())
    }

    /// An explicit `match_threshold` wins, then the threshold recommended by
    /// the descriptor model, then `DEFAULT_MATCH_THRESHOLD`.
    pub fn resolved_match_threshold(&self, model_recommendation: Option<f64>) -> f64 {
        self.match_threshold
            .or(model_recommendation)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD)
    }

    pub fn registration_cooldown(&self) -> Duration {
        Duration::from_millis(self.registration_cooldown_ms)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn window_horizon(&self) -> Duration {
        Duration::from_millis(self.window_horizon_ms)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz as f64)
    }
}
