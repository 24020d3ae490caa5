//! Engine configuration with environment variable overrides.

use crate::error::{EngineError, Result};

/// Tunables for the dispatch engine and its worker pool.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of persistent background workers.
    pub worker_count: usize,
    /// Sleep between dispatch attempts when no request is runnable.
    pub idle_delay_ms: u64,
    /// Sleep after each completed request before the next dispatch.
    pub between_delay_ms: u64,
    /// Sleep between pause-state re-checks while the engine is paused.
    pub pause_poll_ms: u64,
    /// Delay before the single retry of a recoverable failure.
    pub retry_delay_ms: u64,
    /// Capacity of each of the finished and failed request histories.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            idle_delay_ms: 50,
            between_delay_ms: 5,
            pause_poll_ms: 200,
            retry_delay_ms: 1000,
            history_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from defaults plus `REPOINDEX_*` environment
    /// variable overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(workers) = std::env::var("REPOINDEX_WORKER_COUNT") {
            config.worker_count = workers.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid worker_count: {e}"))
            })?;
        }

        if let Ok(idle) = std::env::var("REPOINDEX_IDLE_DELAY_MS") {
            config.idle_delay_ms = idle.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid idle_delay_ms: {e}"))
            })?;
        }

        if let Ok(between) = std::env::var("REPOINDEX_BETWEEN_DELAY_MS") {
            config.between_delay_ms = between.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid between_delay_ms: {e}"))
            })?;
        }

        if let Ok(poll) = std::env::var("REPOINDEX_PAUSE_POLL_MS") {
            config.pause_poll_ms = poll.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid pause_poll_ms: {e}"))
            })?;
        }

        if let Ok(retry) = std::env::var("REPOINDEX_RETRY_DELAY_MS") {
            config.retry_delay_ms = retry.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid retry_delay_ms: {e}"))
            })?;
        }

        if let Ok(limit) = std::env::var("REPOINDEX_HISTORY_LIMIT") {
            config.history_limit = limit.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid history_limit: {e}"))
            })?;
        }

        if config.worker_count == 0 {
            return Err(EngineError::Configuration(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        Ok(config)
    }
}
