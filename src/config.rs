//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{PenaltyPolicy, RuleSet};
use crate::store::DEFAULT_NAMESPACE;

/// Prefix for environment variable overrides, e.g. `TURNSTILE__STORE__PATH`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Longest base penalty accepted from configuration (one day).
const MAX_BASE_PENALTY_SECS: u64 = 86_400;
/// Largest doubling exponent accepted from configuration.
const MAX_CONFIGURED_EXPONENT: u32 = 20;

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Per-scope limits and per-action overrides
    #[serde(default)]
    pub limits: RuleSet,

    /// Lockout escalation
    #[serde(default)]
    pub penalty: PenaltyPolicy,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file used by the file-backed store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Namespace separating rate limit records from other data
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bound on a single store transaction, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            namespace: default_namespace(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Transaction timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("turnstile-store.json")
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional configuration file and `TURNSTILE__*` environment
    /// variables over the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: TurnstileConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;

        if self.penalty.base_secs == 0 || self.penalty.base_secs > MAX_BASE_PENALTY_SECS {
            return Err(TurnstileError::Config(format!(
                "penalty.base_secs must be between 1 and {}",
                MAX_BASE_PENALTY_SECS
            )));
        }
        if self.penalty.max_exponent > MAX_CONFIGURED_EXPONENT {
            return Err(TurnstileError::Config(format!(
                "penalty.max_exponent must be at most {}",
                MAX_CONFIGURED_EXPONENT
            )));
        }
        if self.store.namespace.trim().is_empty() {
            return Err(TurnstileError::Config(
                "store.namespace must not be empty".to_string(),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Limit, Scope};

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.penalty.base_secs, 60);
        assert_eq!(config.penalty.max_exponent, 6);
        assert_eq!(config.store.namespace, "rate_limits");
        assert_eq!(config.store.timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
limits:
  identity: { max_attempts: 5, window_ms: 60000 }
  address: { max_attempts: 30, window_ms: 600000 }
  actions:
    - { scope: identity, action: verifyTotp, max_attempts: 3, window_ms: 300000 }
penalty:
  base_secs: 30
store:
  path: /var/lib/turnstile/records.json
  timeout_ms: 250
logging:
  json: true
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.limits.find_limit(Scope::Identity, "verifyTotp"),
            Limit::new(3, 300_000)
        );
        assert_eq!(config.limits.device, Limit::device_default());
        assert_eq!(config.penalty.base_secs, 30);
        assert_eq!(config.penalty.max_exponent, 6);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/turnstile/records.json"));
        assert_eq!(config.store.namespace, "rate_limits");
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert!(config.logging.json);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(TurnstileConfig::from_yaml("store: { timeout_ms: 0 }").is_err());
        assert!(TurnstileConfig::from_yaml("store: { namespace: '' }").is_err());
        assert!(TurnstileConfig::from_yaml("penalty: { base_secs: 0 }").is_err());
        assert!(TurnstileConfig::from_yaml("penalty: { max_exponent: 64 }").is_err());
        assert!(TurnstileConfig::from_yaml("limits: { identity: { max_attempts: 0, window_ms: 1 } }").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("turnstile-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("turnstile.yaml");
        std::fs::write(
            &path,
            "limits:\n  device:\n    max_attempts: 4\n    window_ms: 1000\npenalty:\n  max_exponent: 3\n",
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limits.device, Limit::new(4, 1000));
        assert_eq!(config.penalty.max_exponent, 3);
        assert_eq!(config.penalty.base_secs, 60);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = std::env::temp_dir().join(format!("turnstile-missing-{}.yaml", uuid::Uuid::new_v4()));
        assert!(TurnstileConfig::load(Some(&path)).is_err());
    }
}
