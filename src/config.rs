//! Controller and engine settings.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ANIMATION_DELAY_ENV: &str = "CPNSIM_ANIMATION_DELAY_MS";
pub const SEED_ENV: &str = "CPNSIM_SEED";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value `{value}` for {key}")]
    Env { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pause between steps of an animated run.
    pub animation_delay_ms: u64,
    /// Seed for the engine's choice among equally prioritized bindings.
    pub seed: Option<u64>,
    /// Rhai operation budget per evaluation, 0 for unlimited.
    pub max_operations: u64,
    /// Buffered events per subscriber before it starts lagging.
    pub event_channel_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            animation_delay_ms: 500,
            seed: None,
            max_operations: 1_000_000,
            event_channel_capacity: 256,
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Applies `CPNSIM_ANIMATION_DELAY_MS` and `CPNSIM_SEED` when set.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ANIMATION_DELAY_ENV) {
            self.animation_delay_ms = value.trim().parse().map_err(|_| ConfigError::Env {
                key: ANIMATION_DELAY_ENV,
                value,
            })?;
        }
        if let Some(value) = lookup(SEED_ENV) {
            self.seed = Some(value.trim().parse().map_err(|_| ConfigError::Env {
                key: SEED_ENV,
                value,
            })?);
        }
        Ok(self)
    }

    pub fn with_animation_delay(mut self, delay: Duration) -> Self {
        self.animation_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn animation_delay(&self) -> Duration {
        Duration::from_millis(self.animation_delay_ms)
    }
}
