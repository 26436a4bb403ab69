//! Scoring configuration
//!
//! Reading speed, sampling cadence and worker parallelism are passed explicitly
//! into every scoring run so tenants and tests can override them.
//!
//! A configuration file is TOML with a single `[scoring]` table:
//!
//! ```toml
//! [scoring]
//! average_reading_speed = 270.0
//! sampling_interval_seconds = 2.0
//! max_parallelism = 4
//! ```

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Average adult reading speed in words per minute
pub const DEFAULT_AVERAGE_READING_SPEED: f64 = 270.0;

/// Client telemetry cadence: one sample every 2 seconds
pub const DEFAULT_SAMPLING_INTERVAL_SECONDS: f64 = 2.0;

/// Options recognised by the scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Words per minute used to derive the reading-time threshold
    pub average_reading_speed: f64,
    /// Seconds represented by one in-viewport sample
    pub sampling_interval_seconds: f64,
    /// Upper bound on sessions scored concurrently
    pub max_parallelism: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            average_reading_speed: DEFAULT_AVERAGE_READING_SPEED,
            sampling_interval_seconds: DEFAULT_SAMPLING_INTERVAL_SECONDS,
            max_parallelism: default_parallelism(),
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    scoring: ScoringConfig,
}

impl ScoringConfig {
    pub fn with_average_reading_speed(mut self, words_per_minute: f64) -> Self {
        self.average_reading_speed = words_per_minute;
        self
    }

    pub fn with_sampling_interval(mut self, seconds: f64) -> Self {
        self.sampling_interval_seconds = seconds;
        self
    }

    pub fn with_max_parallelism(mut self, workers: usize) -> Self {
        self.max_parallelism = workers;
        self
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ComputeError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.scoring.validate()?;
        Ok(file.scoring)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComputeError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values that would make the scoring formula meaningless.
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !self.average_reading_speed.is_finite() || self.average_reading_speed <= 0.0 {
            return Err(ComputeError::ConfigError(format!(
                "average_reading_speed must be a positive number, got {}",
                self.average_reading_speed
            )));
        }
        if !self.sampling_interval_seconds.is_finite() || self.sampling_interval_seconds < 0.0 {
            return Err(ComputeError::ConfigError(format!(
                "sampling_interval_seconds must be a non-negative number, got {}",
                self.sampling_interval_seconds
            )));
        }
        if self.max_parallelism == 0 {
            return Err(ComputeError::ConfigError(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
