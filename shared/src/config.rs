use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::{
    DEFAULT_DEDUP_RADIUS_M, DEFAULT_MAX_CANDIDATES, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_STORE_TIMEOUT_MS, MAX_CANDIDATES_LIMIT, MAX_DEDUP_RADIUS_M, MAX_QUEUE_CAPACITY,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not parse configuration: {0}")]
    Parse(String),
}

/// Tunables for duplicate detection, store access and the offline queue.
/// Shells usually pass this in as JSON; missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Search radius around a draft, in meters.
    pub radius_m: f64,
    /// Most candidates returned by a single nearby query, passed through to
    /// the store. At most [`MAX_CANDIDATES_LIMIT`].
    pub max_candidates: usize,
    /// Client-side bound on each store call.
    pub store_timeout_ms: u64,
    /// At most [`MAX_QUEUE_CAPACITY`].
    pub queue_capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_DEDUP_RADIUS_M,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DedupConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(ConfigError::Invalid("radius_m must be > 0".into()));
        }
        if self.radius_m > MAX_DEDUP_RADIUS_M {
            return Err(ConfigError::Invalid(format!(
                "radius_m must be at most {MAX_DEDUP_RADIUS_M}"
            )));
        }
        if self.max_candidates == 0 {
            return Err(ConfigError::Invalid("max_candidates must be > 0".into()));
        }
        if self.max_candidates > MAX_CANDIDATES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_candidates must be at most {MAX_CANDIDATES_LIMIT}"
            )));
        }
        if self.store_timeout_ms < 100 {
            return Err(ConfigError::Invalid(
                "store_timeout_ms should be at least 100ms".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "queue_capacity must be at most {MAX_QUEUE_CAPACITY}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
