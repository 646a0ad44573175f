//! Runtime configuration, layered defaults -> file -> env -> explicit overrides.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy shared by the Graph Executor's node retries and the
/// rate-limited call helper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for attempt 1, in seconds.
    pub base_delay: f64,
    /// Upper bound on any single backoff delay, in seconds.
    pub max_delay: f64,
    /// Whether jitter is applied to the computed delay.
    pub jitter: bool,
    /// Jitter is a uniform multiplier in `[1 - jitter_factor, 1 + jitter_factor]`.
    pub jitter_factor: f64,
    /// Maximum number of retries, not counting the initial attempt.
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: 1.0,
            max_delay: 60.0,
            jitter: true,
            jitter_factor: 0.5,
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` (0-based), before jitter is applied.
    pub fn backoff_for(&self, attempt: u32) -> f64 {
        let raw = self.base_delay * 2f64.powi(attempt as i32);
        raw.min(self.max_delay)
    }
}

/// Options for the Concurrent Storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Read-cache entry lifetime.
    pub cache_ttl_secs: u64,
    /// Write-coalescing window for the background drain loop.
    pub batch_interval_secs: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            batch_interval_secs: 0.1,
        }
    }
}

/// Top-level runtime configuration. Plain, `serde`-deserializable data;
/// validated once at `AgentRuntime` construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on simultaneous executions per entry point / stream.
    pub max_concurrent_executions: usize,
    /// Ring-buffer depth kept by the Event Bus and shared-state history.
    pub max_history: usize,
    /// Eligibility window for purging execution-scoped state partitions.
    pub execution_state_ttl_secs: u64,
    /// Period of the background purge task.
    pub cleanup_interval_secs: u64,
    /// Backoff policy applied by the Graph Executor's node retries.
    pub default_retry: RetryConfig,
    /// Concurrent Storage tuning.
    pub storage: StorageConfig,
    /// Hard cap on node evaluations per run, unless the graph overrides it.
    pub max_steps: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 100,
            max_history: 1000,
            execution_state_ttl_secs: 3600,
            cleanup_interval_secs: 300,
            default_retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            max_steps: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Layer `RUNTIME_*` environment variables over `self`, returning the merged config.
    ///
    /// Recognised keys: `RUNTIME_MAX_CONCURRENT_EXECUTIONS`, `RUNTIME_MAX_HISTORY`,
    /// `RUNTIME_EXECUTION_STATE_TTL_SECS`, `RUNTIME_CLEANUP_INTERVAL_SECS`,
    /// `RUNTIME_MAX_STEPS`. Unrecognised or unparsable values are ignored with
    /// a warning rather than failing the layering pass.
    pub fn merged_with_env(mut self) -> Self {
        macro_rules! layer_usize {
            ($field:ident, $key:literal) => {
                if let Ok(v) = std::env::var($key) {
                    match v.parse::<usize>() {
                        Ok(parsed) => self.$field = parsed,
                        Err(_) => tracing::warn!(key = $key, value = %v, "ignoring unparsable env override"),
                    }
                }
            };
        }
        macro_rules! layer_u64 {
            ($field:ident, $key:literal) => {
                if let Ok(v) = std::env::var($key) {
                    match v.parse::<u64>() {
                        Ok(parsed) => self.$field = parsed,
                        Err(_) => tracing::warn!(key = $key, value = %v, "ignoring unparsable env override"),
                    }
                }
            };
        }
        layer_usize!(max_concurrent_executions, "RUNTIME_MAX_CONCURRENT_EXECUTIONS");
        layer_usize!(max_history, "RUNTIME_MAX_HISTORY");
        layer_u64!(execution_state_ttl_secs, "RUNTIME_EXECUTION_STATE_TTL_SECS");
        layer_u64!(cleanup_interval_secs, "RUNTIME_CLEANUP_INTERVAL_SECS");
        layer_usize!(max_steps, "RUNTIME_MAX_STEPS");
        self
    }

    /// Parse a config layer from TOML text, to be merged before env/explicit overrides.
    pub fn from_toml_str(text: &str) -> RuntimeResult<Self> {
        toml::from_str(text).map_err(|e| RuntimeError::Configuration(format!("invalid TOML config: {e}")))
    }

    /// Reject configurations that can never be satisfied by the runtime.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.max_concurrent_executions == 0 {
            return Err(RuntimeError::Configuration(
                "max_concurrent_executions must be > 0".into(),
            ));
        }
        if self.max_history == 0 {
            return Err(RuntimeError::Configuration("max_history must be > 0".into()));
        }
        if self.max_steps == 0 {
            return Err(RuntimeError::Configuration("max_steps must be > 0".into()));
        }
        if self.default_retry.base_delay < 0.0 || self.default_retry.max_delay < 0.0 {
            return Err(RuntimeError::Configuration(
                "retry delays must be non-negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_retry.jitter_factor) {
            return Err(RuntimeError::Configuration(
                "jitter_factor must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// The execution-state TTL as a [`Duration`].
    pub fn execution_state_ttl(&self) -> Duration {
        Duration::from_secs(self.execution_state_ttl_secs)
    }

    /// The background cleanup period as a [`Duration`].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_concurrent_executions, 100);
        assert_eq!(cfg.storage.cache_ttl_secs, 3600);
        assert_eq!(cfg.storage.batch_interval_secs, 0.1);
        assert_eq!(cfg.max_history, 1000);
        assert_eq!(cfg.execution_state_ttl_secs, 3600);
        assert_eq!(cfg.cleanup_interval_secs, 300);
        assert_eq!(cfg.default_retry.base_delay, 1.0);
        assert_eq!(cfg.default_retry.max_delay, 60.0);
        assert_eq!(cfg.default_retry.jitter_factor, 0.5);
        assert_eq!(cfg.max_steps, 1000);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut cfg = RuntimeConfig::default();
        cfg.max_concurrent_executions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_matches_reference_table() {
        let cfg = RetryConfig {
            base_delay: 1.0,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(cfg.backoff_for(0), 1.0);
        assert_eq!(cfg.backoff_for(1), 2.0);
        assert_eq!(cfg.backoff_for(2), 4.0);
        assert_eq!(cfg.backoff_for(3), 8.0);

        let capped = RetryConfig {
            base_delay: 10.0,
            max_delay: 30.0,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(capped.backoff_for(0), 10.0);
        assert_eq!(capped.backoff_for(1), 20.0);
        assert_eq!(capped.backoff_for(2), 30.0);
        assert_eq!(capped.backoff_for(3), 30.0);
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("RUNTIME_MAX_STEPS", "42");
        let cfg = RuntimeConfig::default().merged_with_env();
        assert_eq!(cfg.max_steps, 42);
        std::env::remove_var("RUNTIME_MAX_STEPS");
    }

    #[test]
    fn from_toml_str_parses_partial_overrides() {
        let cfg = RuntimeConfig::from_toml_str(
            r#"
            max_concurrent_executions = 50
            max_steps = 200

            [default_retry]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent_executions, 50);
        assert_eq!(cfg.max_steps, 200);
        assert_eq!(cfg.default_retry.max_retries, 5);
        assert_eq!(cfg.max_history, RuntimeConfig::default().max_history);
    }

    #[test]
    fn from_toml_str_rejects_malformed_toml() {
        assert!(RuntimeConfig::from_toml_str("not = [valid").is_err());
    }
}
