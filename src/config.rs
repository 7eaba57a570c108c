//! Configuration types for the dispatcher
//!
//! This module contains the structures loaded from a YAML config file.
//! Every field has a default, so an empty document is a valid config.
//!
//! ```yaml
//! identity: my-crawler
//! timeout_secs: 5
//! stream: false
//! allow_redirects: true
//! retry:
//!   max_retries: 10
//!   base_delay_secs: 2
//! limiter:
//!   policy: block
//!   rules:
//!     - { limit: 1, per: second }
//!     - { limit: 56, per: minute }
//!   store:
//!     type: file
//!     path: /var/tmp/pacer.json
//! ```

use crate::error::{Error, Result};
use crate::limiter::Per;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Convert a seconds value from config into a [`Duration`]
pub fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::config(format!("{field} is out of range (got {value}): {e}")))
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Caller identity used as the rate-limit bucket key
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Override for the default User-Agent header
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Connection establishment timeout in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<f64>,

    /// Hand back response bodies as streams instead of buffering them
    #[serde(default)]
    pub stream: bool,

    /// Follow redirects
    #[serde(default = "default_true")]
    pub allow_redirects: bool,

    /// Timeout retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate limiter settings
    #[serde(default)]
    pub limiter: LimiterConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            user_agent: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: None,
            stream: false,
            allow_redirects: true,
            retry: RetryConfig::default(),
            limiter: LimiterConfig::default(),
        }
    }
}

fn default_identity() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_timeout_secs() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

impl DispatcherConfig {
    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| Error::config(format!("Failed to parse config YAML: {e}")))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(Error::config("identity cannot be empty"));
        }

        if self.timeout()?.is_zero() {
            return Err(Error::config(format!(
                "timeout_secs must be positive (got {})",
                self.timeout_secs
            )));
        }

        if self.connect_timeout()?.is_some_and(|d| d.is_zero()) {
            return Err(Error::config("connect_timeout_secs must be positive"));
        }

        self.retry.base_delay()?;
        self.limiter.validate()
    }

    /// Request timeout
    pub fn timeout(&self) -> Result<Duration> {
        seconds("timeout_secs", self.timeout_secs)
    }

    /// Connect timeout, when set
    pub fn connect_timeout(&self) -> Result<Option<Duration>> {
        self.connect_timeout_secs
            .map(|secs| seconds("connect_timeout_secs", secs))
            .transpose()
    }
}

// ============================================================================
// Retry Config
// ============================================================================

/// Timeout retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry
    pub fn base_delay(&self) -> Result<Duration> {
        seconds("retry.base_delay_secs", self.base_delay_secs)
    }
}

fn default_max_retries() -> u32 {
    10
}

fn default_base_delay_secs() -> f64 {
    2.0
}

// ============================================================================
// Limiter Config
// ============================================================================

/// Rate limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Rules that must all have capacity
    #[serde(default = "default_rule_configs")]
    pub rules: Vec<RuleConfig>,

    /// Behavior when no capacity is available
    #[serde(default)]
    pub policy: PolicyKind,

    /// Longest total wait under `max_delay`
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,

    /// Where grant history lives
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rules: default_rule_configs(),
            policy: PolicyKind::default(),
            max_delay_secs: default_max_delay_secs(),
            store: StoreConfig::default(),
        }
    }
}

fn default_rule_configs() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            limit: 1,
            per: Per::Second,
        },
        RuleConfig {
            limit: 56,
            per: Per::Minute,
        },
    ]
}

fn default_max_delay_secs() -> f64 {
    60.0
}

impl LimiterConfig {
    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(Error::config("limiter.rules cannot be empty"));
        }
        if let Some(rule) = self.rules.iter().find(|r| r.limit == 0) {
            return Err(Error::config(format!(
                "limiter rule limit must be positive (per {:?})",
                rule.per
            )));
        }
        if self.policy == PolicyKind::MaxDelay {
            seconds("limiter.max_delay_secs", self.max_delay_secs)?;
        }
        Ok(())
    }
}

/// One `limit` per `per` rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub limit: u32,
    pub per: Per,
}

/// Limiter acquisition policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Wait until admitted
    #[default]
    Block,
    /// Wait up to `max_delay_secs`, then fail
    MaxDelay,
}

/// Limiter state backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process memory
    #[default]
    Memory,
    /// JSON file shared across processes
    File {
        /// State file location
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_is_default() {
        let config = DispatcherConfig::from_yaml_str("").unwrap();
        assert_eq!(config, DispatcherConfig::default());
        assert_eq!(config.identity, "pacer");
        assert_eq!(config.timeout_secs, 5.0);
        assert!(!config.stream);
        assert!(config.allow_redirects);
        assert_eq!(config.retry.max_retries, 10);
        assert_eq!(config.retry.base_delay_secs, 2.0);
        assert_eq!(config.limiter.rules.len(), 2);
        assert_eq!(config.limiter.policy, PolicyKind::Block);
        assert_eq!(config.limiter.store, StoreConfig::Memory);
    }

    #[test]
    fn test_full_document() {
        let yaml = r"
identity: crawler
user_agent: crawler/2.0
timeout_secs: 8
connect_timeout_secs: 1.5
stream: true
allow_redirects: false
retry:
  max_retries: 3
  base_delay_secs: 0.5
limiter:
  policy: max_delay
  max_delay_secs: 10
  rules:
    - { limit: 2, per: second }
    - { limit: 500, per: day }
  store:
    type: file
    path: /tmp/pacer-test.json
";
        let config = DispatcherConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.identity, "crawler");
        assert_eq!(config.user_agent.as_deref(), Some("crawler/2.0"));
        assert_eq!(config.timeout_secs, 8.0);
        assert_eq!(config.connect_timeout_secs, Some(1.5));
        assert!(config.stream);
        assert!(!config.allow_redirects);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.limiter.policy, PolicyKind::MaxDelay);
        assert_eq!(
            config.limiter.rules,
            vec![
                RuleConfig {
                    limit: 2,
                    per: Per::Second
                },
                RuleConfig {
                    limit: 500,
                    per: Per::Day
                },
            ]
        );
        assert_eq!(
            config.limiter.store,
            StoreConfig::File {
                path: PathBuf::from("/tmp/pacer-test.json")
            }
        );
    }

    #[test]
    fn test_validation_errors() {
        assert!(DispatcherConfig::from_yaml_str("identity: ''").is_err());
        assert!(DispatcherConfig::from_yaml_str("timeout_secs: 0").is_err());
        assert!(DispatcherConfig::from_yaml_str("connect_timeout_secs: -1").is_err());
        assert!(DispatcherConfig::from_yaml_str("limiter: { rules: [] }").is_err());
        assert!(
            DispatcherConfig::from_yaml_str("limiter: { rules: [{ limit: 0, per: second }] }")
                .is_err()
        );
        assert!(DispatcherConfig::from_yaml_str("limiter: { store: { type: redis } }").is_err());
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        for yaml in [
            "timeout_secs: 1e20",
            "timeout_secs: .nan",
            "timeout_secs: -3",
            "connect_timeout_secs: 1e20",
            "connect_timeout_secs: 0",
            "retry: { base_delay_secs: 1e20 }",
            "retry: { base_delay_secs: -1 }",
            "limiter: { policy: max_delay, max_delay_secs: -1 }",
            "limiter: { policy: max_delay, max_delay_secs: .inf }",
        ] {
            let result = DispatcherConfig::from_yaml_str(yaml);
            assert!(
                matches!(result, Err(Error::Config { .. })),
                "{yaml} should be rejected"
            );
        }
    }

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(seconds("x", 2.5).unwrap(), Duration::from_millis(2500));
        assert_eq!(seconds("x", 0.0).unwrap(), Duration::ZERO);
        assert!(seconds("x", 1e20).is_err());
        assert!(seconds("x", -0.5).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pacer.yaml");
        std::fs::write(&path, "identity: from-file\n").unwrap();

        let config = DispatcherConfig::from_file(&path).unwrap();
        assert_eq!(config.identity, "from-file");

        let missing = DispatcherConfig::from_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(Error::Config { .. })));
    }
}
