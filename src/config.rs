//! Configuration management for Toolgate.
//!
//! Everything here is resolved once at process start: the degradation mode
//! (with a single environment override), the fallback window, the store
//! operation timeout, and limit catalog overrides. Nothing is re-read at
//! request time.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolgateError};
use crate::ratelimit::{DegradationPolicy, FailMode, LimitCatalog, LimitWindow, Tier};

/// Environment variable selecting the degradation mode (`open` or `closed`).
pub const FAIL_MODE_ENV: &str = "RATE_LIMIT_FAIL_MODE";

/// Main configuration for the Toolgate admission layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolgateConfig {
    /// Degradation mode when the counter store is unreachable
    #[serde(default)]
    pub fail_mode: FailMode,

    /// Window reported to denied callers while the store is down (fail-closed)
    #[serde(default = "default_fallback_window_ms")]
    pub fallback_window_ms: u64,

    /// Per-operation timeout for counter store calls
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Overrides applied on top of the compiled-in limit catalog
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for ToolgateConfig {
    fn default() -> Self {
        Self {
            fail_mode: FailMode::default(),
            fallback_window_ms: default_fallback_window_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            limits: LimitsConfig::default(),
        }
    }
}

fn default_fallback_window_ms() -> u64 {
    60_000
}

fn default_store_timeout_ms() -> u64 {
    50
}

/// Limit catalog overrides. Absent entries keep their compiled-in values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub tiers: HashMap<Tier, LimitWindow>,

    #[serde(default)]
    pub hourly: HashMap<Tier, LimitWindow>,

    #[serde(default)]
    pub endpoints: HashMap<String, LimitWindow>,

    #[serde(default)]
    pub tools: HashMap<String, LimitWindow>,
}

impl ToolgateConfig {
    /// Load configuration from a YAML file, then apply the environment
    /// override for the fail mode.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ToolgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ToolgateError::Config(e.to_string()))?;
        config.fail_mode = Self::resolve_fail_mode(
            std::env::var(FAIL_MODE_ENV).ok().as_deref(),
            config.fail_mode,
        )?;
        Ok(config)
    }

    /// Defaults plus the environment override for the fail mode.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.fail_mode = Self::resolve_fail_mode(
            std::env::var(FAIL_MODE_ENV).ok().as_deref(),
            config.fail_mode,
        )?;
        Ok(config)
    }

    /// Resolve the fail mode from a raw environment value. Unset keeps the
    /// configured mode; a value that is neither `open` nor `closed` is a
    /// fatal configuration error.
    pub fn resolve_fail_mode(raw: Option<&str>, configured: FailMode) -> Result<FailMode> {
        match raw {
            None => Ok(configured),
            Some(value) => value
                .parse()
                .map_err(|e: String| ToolgateError::Config(format!("{}: {}", FAIL_MODE_ENV, e))),
        }
    }

    /// The degradation policy this configuration selects.
    pub fn degradation_policy(&self) -> DegradationPolicy {
        DegradationPolicy::with_fallback_window(
            self.fail_mode,
            Duration::from_millis(self.fallback_window_ms),
        )
    }

    /// The per-operation store timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Build and validate the limit catalog.
    pub fn catalog(&self) -> Result<LimitCatalog> {
        LimitCatalog::from_config(&self.limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ToolgateConfig::default();

        assert_eq!(config.fail_mode, FailMode::Closed);
        assert_eq!(config.fallback_window_ms, 60_000);
        assert_eq!(config.store_timeout_ms, 50);
        assert!(config.catalog().is_ok());
    }

    #[test]
    fn test_parse_yaml_overrides() {
        let yaml = r#"
fail_mode: open
store_timeout_ms: 25
limits:
  tiers:
    anonymous:
      max_requests: 3
      window_ms: 30000
  endpoints:
    /api/export:
      max_requests: 2
      window_ms: 60000
"#;
        let config: ToolgateConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.fail_mode, FailMode::Open);
        assert_eq!(config.store_timeout(), Duration::from_millis(25));

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.default_limit(Tier::Anonymous).max_requests, 3);
        assert_eq!(
            catalog.endpoint_limit("/api/export"),
            Some(LimitWindow::new(2, 60_000))
        );
    }

    #[test]
    fn test_invalid_override_fails_catalog_build() {
        let yaml = r#"
limits:
  tools:
    broken:
      max_requests: 0
      window_ms: 60000
"#;
        let config: ToolgateConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.catalog().is_err());
    }

    #[test]
    fn test_resolve_fail_mode() {
        assert_eq!(
            ToolgateConfig::resolve_fail_mode(None, FailMode::Closed).unwrap(),
            FailMode::Closed
        );
        assert_eq!(
            ToolgateConfig::resolve_fail_mode(Some("open"), FailMode::Closed).unwrap(),
            FailMode::Open
        );
        assert_eq!(
            ToolgateConfig::resolve_fail_mode(Some("closed"), FailMode::Open).unwrap(),
            FailMode::Closed
        );
        assert!(ToolgateConfig::resolve_fail_mode(Some("ajar"), FailMode::Closed).is_err());
    }
}
