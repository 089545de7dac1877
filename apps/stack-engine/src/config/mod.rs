//! Configuration module for the stack engine.
//!
//! Loads a YAML file, interpolates environment variables and validates the
//! result before any component is built from it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stack_engine::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//! println!("cycle every {}s", config.schedule.cycle_interval_secs);
//! ```

mod broker;
mod execution;
mod handler;
mod locks;
mod observability;
mod persistence;
mod reconciliation;
mod rolls;
mod schedule;
mod submission;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::contracts::ContractSpec;

pub use broker::{BrokerConfig, PaperBrokerConfig};
pub use execution::ExecutionConfig;
pub use handler::{HandlerConfig, StageConfig, StagesConfig};
pub use locks::LockConfig;
pub use observability::ObservabilityConfig;
pub use persistence::{PersistenceBackend, PersistenceConfig};
pub use reconciliation::ReconciliationConfig;
pub use rolls::RollsConfig;
pub use schedule::{ScheduleConfig, TimeWindow};
pub use submission::SubmissionConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Handler and stage scheduling.
    #[serde(default)]
    pub handler: HandlerConfig,
    /// Order lock settings.
    #[serde(default)]
    pub locks: LockConfig,
    /// Broker submission timeout and retries.
    #[serde(default)]
    pub submission: SubmissionConfig,
    /// Position reconciliation.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Forced rolls.
    #[serde(default)]
    pub rolls: RollsConfig,
    /// Execution algorithm policy.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Tradable contracts.
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    /// Broker adapter.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Stack and ledger persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Cycle cadence for the binary.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        }
    })
    .into_owned()
}

/// Validate configuration values.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.handler.holder_prefix.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "handler.holder_prefix must not be empty".to_string(),
        ));
    }

    if config.locks.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "locks.poll_interval_ms must be positive".to_string(),
        ));
    }

    let submission = &config.submission;
    if submission.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "submission.timeout_ms must be positive".to_string(),
        ));
    }
    if submission.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "submission.max_attempts must be at least 1".to_string(),
        ));
    }
    if submission.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "submission.backoff_multiplier must be at least 1.0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&submission.jitter_factor) {
        return Err(ConfigError::ValidationError(
            "submission.jitter_factor must be between 0.0 and 1.0".to_string(),
        ));
    }
    if submission.initial_backoff_ms > submission.max_backoff_ms {
        return Err(ConfigError::ValidationError(
            "submission.initial_backoff_ms must not exceed max_backoff_ms".to_string(),
        ));
    }

    if config.rolls.window_days < 0 {
        return Err(ConfigError::ValidationError(
            "rolls.window_days must not be negative".to_string(),
        ));
    }

    if config.schedule.cycle_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "schedule.cycle_interval_secs must be positive".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for contract in &config.contracts {
        if !seen.insert(&contract.id) {
            return Err(ConfigError::ValidationError(format!(
                "contract '{}' is listed twice",
                contract.id
            )));
        }
    }

    if let Some(addr) = &config.observability.metrics_addr {
        if addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "observability.metrics_addr '{addr}' is not a socket address"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_stack::ExecutionAlgo;
    use crate::domain::shared::{InstrumentId, StrategyId};

    #[test]
    fn test_load_empty_config_uses_defaults() {
        let config = match load_config_from_string("{}") {
            Ok(c) => c,
            Err(e) => panic!("should load empty config: {e}"),
        };
        assert_eq!(config.handler.holder_prefix, "stack-handler");
        assert_eq!(config.submission.max_attempts, 5);
        assert_eq!(config.rolls.window_days, 5);
        assert_eq!(config.persistence.backend, PersistenceBackend::Memory);
        assert_eq!(config.handler.stages.generate_roll_orders.min_interval_secs, 86_400);
        assert!(config.contracts.is_empty());
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "dir: ${STACK_ENGINE_TEST_NONEXISTENT_VAR:-/tmp/stacks}";
        assert_eq!(interpolate_env_vars(input), "dir: /tmp/stacks");
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "dir: ${STACK_ENGINE_TEST_UNLIKELY_TO_EXIST}";
        assert_eq!(interpolate_env_vars(input), "dir: ");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax, not format args
    fn test_env_var_with_default_uses_existing() {
        let result = interpolate_env_vars("path: ${PATH:-default}");
        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn test_validation_zero_attempts() {
        let yaml = r"
submission:
  max_attempts: 0
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero attempts");
        };
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validation_duplicate_contract() {
        let yaml = r#"
contracts:
  - id: SOFR_20261216
    instrument: SOFR
    expiry: "2026-12-16"
  - id: SOFR_20261216
    instrument: SOFR
    expiry: "2026-12-16"
"#;
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for duplicate contract");
        };
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_validation_bad_metrics_addr() {
        let yaml = r#"
observability:
  metrics_addr: "not-an-address"
"#;
        assert!(load_config_from_string(yaml).is_err());
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
handler:
  holder_prefix: "node-a"
  stages:
    check_position_breaks:
      min_interval_secs: 30
    remove_completed_orders:
      max_executions_per_run: 100
      active_window:
        start: "21:00:00"
        end: "23:00:00"

locks:
  acquire_timeout_ms: 250
  stale_after_secs: 600

submission:
  timeout_ms: 2000
  max_attempts: 3

reconciliation:
  position_tolerance: 1

rolls:
  window_days: 7

execution:
  default_algo: limit
  instruments:
    SOFR: adaptive
  strategies:
    carry: market

contracts:
  - id: SOFR_20261216
    instrument: SOFR
    expiry: "2026-12-16"

persistence:
  backend: json
  data_dir: "${STACK_ENGINE_TEST_DATA_DIR:-/var/lib/stacks}"

schedule:
  cycle_interval_secs: 5
  window:
    start: "07:00:00"
    end: "21:00:00"

observability:
  metrics_addr: "127.0.0.1:9464"
"#;

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load full config: {e}"),
        };

        assert_eq!(config.handler.holder_prefix, "node-a");
        assert_eq!(config.handler.stages.check_position_breaks.min_interval_secs, 30);
        assert_eq!(
            config.handler.stages.remove_completed_orders.max_executions_per_run,
            Some(100)
        );
        assert!(config.handler.stages.remove_completed_orders.active_window.is_some());
        assert_eq!(config.locks.acquire_timeout_ms, 250);
        assert_eq!(config.submission.max_attempts, 3);
        assert_eq!(config.reconciliation.position_tolerance, 1);
        assert_eq!(config.rolls.window_days, 7);
        assert_eq!(config.execution.default_algo, ExecutionAlgo::Limit);
        assert_eq!(
            config.execution.instruments.get(&InstrumentId::new("SOFR")),
            Some(&ExecutionAlgo::Adaptive)
        );
        assert_eq!(
            config.execution.strategies.get(&StrategyId::new("carry")),
            Some(&ExecutionAlgo::Market)
        );
        assert_eq!(config.contracts.len(), 1);
        assert_eq!(config.persistence.backend, PersistenceBackend::Json);
        assert_eq!(config.persistence.data_dir, "/var/lib/stacks");
        assert_eq!(config.schedule.cycle_interval_secs, 5);
    }
}
