//! Engine configuration
//!
//! Defaults match the fixed constants of the noise protocol; a TOML file may
//! override them per deployment (not per plan).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum cases sampled per (action, context)
pub const NOISE_SAMPLE_CAP: usize = 2;

/// Warmup delivery attempts before the context is skipped
pub const WARMUP_MAX_ATTEMPTS: u32 = 3;

/// Join barrier budget for one batch of probe sends, in milliseconds
pub const GROUP_SEND_WAIT_TIMEOUT_MS: u64 = 100_000;

/// Header telling the target which dependency to prepare
pub const WARMUP_HEADER: &str = "x-replay-prepare-dependency";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent probe sends
    pub send_concurrency: usize,
    /// Concurrent analysis units (`None` = unbounded)
    pub analysis_concurrency: Option<usize>,
    /// Warmup delivery attempts
    pub warmup_max_attempts: u32,
    /// Cases sampled per (action, context)
    pub noise_sample_cap: usize,
    /// Join barrier budget in milliseconds
    pub group_send_wait_timeout_ms: u64,
    /// Header carrying the dependency identifier on warmup sends
    pub warmup_header: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With send concurrency
    #[inline]
    #[must_use]
    pub fn with_send_concurrency(mut self, concurrency: usize) -> Self {
        self.send_concurrency = concurrency;
        self
    }

    /// With bounded analysis concurrency
    #[inline]
    #[must_use]
    pub fn with_analysis_concurrency(mut self, concurrency: usize) -> Self {
        self.analysis_concurrency = Some(concurrency);
        self
    }

    /// With join barrier timeout
    #[inline]
    #[must_use]
    pub fn with_group_send_wait_timeout(mut self, timeout: Duration) -> Self {
        self.group_send_wait_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Join barrier budget
    #[inline]
    #[must_use]
    pub fn group_send_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.group_send_wait_timeout_ms)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed input, `ConfigError::Invalid` for
    /// out-of-range values.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_concurrency == 0 {
            return Err(invalid("send_concurrency", "must be at least 1"));
        }
        if self.analysis_concurrency == Some(0) {
            return Err(invalid("analysis_concurrency", "must be at least 1 when set"));
        }
        if self.warmup_max_attempts == 0 {
            return Err(invalid("warmup_max_attempts", "must be at least 1"));
        }
        if self.noise_sample_cap == 0 {
            return Err(invalid("noise_sample_cap", "must be at least 1"));
        }
        if self.group_send_wait_timeout_ms == 0 {
            return Err(invalid("group_send_wait_timeout_ms", "must be at least 1"));
        }
        if self.warmup_header.trim().is_empty() {
            return Err(invalid("warmup_header", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_concurrency: 8,
            analysis_concurrency: None,
            warmup_max_attempts: WARMUP_MAX_ATTEMPTS,
            noise_sample_cap: NOISE_SAMPLE_CAP,
            group_send_wait_timeout_ms: GROUP_SEND_WAIT_TIMEOUT_MS,
            warmup_header: WARMUP_HEADER.to_string(),
        }
    }
}
