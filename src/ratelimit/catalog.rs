//! Static catalog of rate limit windows.
//!
//! The catalog is a pure lookup table built once at startup: per-tier
//! defaults, optional hourly ceilings, and per-endpoint / per-tool overrides.
//! It performs no I/O and is never mutated after construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LimitsConfig;
use crate::error::{Result, ToolgateError};

/// A caller's trust classification, assigned upstream per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Authenticated,
    Service,
}

impl Tier {
    /// All tiers, in ascending order of trust.
    pub const ALL: [Tier; 3] = [Tier::Anonymous, Tier::Authenticated, Tier::Service];

    /// The stable string form used in counter keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Authenticated => "authenticated",
            Tier::Service => "service",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed counting window: at most `max_requests` admitted events per
/// `window_ms` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitWindow {
    /// Maximum requests allowed in the window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl LimitWindow {
    pub const fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    /// Shorthand for a per-minute window.
    pub const fn per_minute(max_requests: u64) -> Self {
        Self::new(max_requests, 60_000)
    }

    /// Shorthand for a per-hour window.
    pub const fn per_hour(max_requests: u64) -> Self {
        Self::new(max_requests, 3_600_000)
    }
}

/// Immutable mapping from (tier, scope) to limit windows.
#[derive(Debug, Clone)]
pub struct LimitCatalog {
    tier_defaults: HashMap<Tier, LimitWindow>,
    hourly: HashMap<Tier, LimitWindow>,
    endpoints: HashMap<String, LimitWindow>,
    tools: HashMap<String, LimitWindow>,
}

impl Default for LimitCatalog {
    fn default() -> Self {
        let tier_defaults = HashMap::from([
            (Tier::Anonymous, LimitWindow::per_minute(5)),
            (Tier::Authenticated, LimitWindow::per_minute(100)),
            (Tier::Service, LimitWindow::per_minute(1000)),
        ]);

        // Only anonymous callers carry a secondary hourly ceiling.
        let hourly = HashMap::from([(Tier::Anonymous, LimitWindow::per_hour(100))]);

        // Sensitive routes get ceilings stricter than any tier default.
        let endpoints = HashMap::from([
            ("/api/auth".to_string(), LimitWindow::per_minute(3)),
            ("/api/tools".to_string(), LimitWindow::per_minute(5)),
            ("/api/tools/stream".to_string(), LimitWindow::per_minute(5)),
            ("/api/ai".to_string(), LimitWindow::per_minute(5)),
        ]);

        // AI-backed operations are throttled individually.
        let tools = HashMap::from([
            ("semantic_search".to_string(), LimitWindow::per_minute(20)),
            ("generate_summary".to_string(), LimitWindow::per_minute(10)),
        ]);

        Self {
            tier_defaults,
            hourly,
            endpoints,
            tools,
        }
    }
}

impl LimitCatalog {
    /// Build a catalog from the compiled-in defaults plus configuration
    /// overrides, validating every entry.
    pub fn from_config(limits: &LimitsConfig) -> Result<Self> {
        let mut catalog = Self::default();
        catalog.tier_defaults.extend(limits.tiers.iter().map(|(t, w)| (*t, *w)));
        catalog.hourly.extend(limits.hourly.iter().map(|(t, w)| (*t, *w)));
        catalog
            .endpoints
            .extend(limits.endpoints.iter().map(|(p, w)| (p.clone(), *w)));
        catalog
            .tools
            .extend(limits.tools.iter().map(|(n, w)| (n.clone(), *w)));
        catalog.validate()?;
        Ok(catalog)
    }

    /// The primary fixed window for a tier. Every tier has one.
    pub fn default_limit(&self, tier: Tier) -> LimitWindow {
        self.tier_defaults
            .get(&tier)
            .copied()
            .unwrap_or(LimitWindow::per_minute(100))
    }

    /// The secondary hourly ceiling for a tier, if configured.
    pub fn hourly_limit(&self, tier: Tier) -> Option<LimitWindow> {
        self.hourly.get(&tier).copied()
    }

    /// Per-route override, independent of tier.
    pub fn endpoint_limit(&self, path: &str) -> Option<LimitWindow> {
        self.endpoints.get(path).copied()
    }

    /// Per-operation override, keyed by tool name.
    pub fn tool_limit(&self, tool_name: &str) -> Option<LimitWindow> {
        self.tools.get(tool_name).copied()
    }

    /// Validate all configured windows.
    ///
    /// Malformed entries (zero counts or zero-length windows) are fatal.
    /// An endpoint override looser than the least permissive tier default is
    /// only a configuration lint: it is logged, not rejected.
    pub fn validate(&self) -> Result<()> {
        for (tier, window) in &self.tier_defaults {
            check_window(window, &format!("tier '{}'", tier))?;
        }
        for (tier, window) in &self.hourly {
            check_window(window, &format!("hourly limit for tier '{}'", tier))?;
        }
        for (path, window) in &self.endpoints {
            check_window(window, &format!("endpoint '{}'", path))?;
        }
        for (name, window) in &self.tools {
            check_window(window, &format!("tool '{}'", name))?;
        }

        let strictest_tier = Tier::ALL
            .iter()
            .map(|t| self.default_limit(*t).max_requests)
            .min()
            .unwrap_or(u64::MAX);
        for (path, window) in &self.endpoints {
            if window.max_requests > strictest_tier {
                warn!(
                    endpoint = %path,
                    max_requests = window.max_requests,
                    strictest_tier_limit = strictest_tier,
                    "Endpoint limit is looser than the strictest tier default and may never constrain some callers"
                );
            }
        }

        Ok(())
    }
}

fn check_window(window: &LimitWindow, scope: &str) -> Result<()> {
    if window.max_requests == 0 {
        return Err(ToolgateError::Config(format!(
            "Limit for {} has max_requests = 0",
            scope
        )));
    }
    if window.window_ms == 0 {
        return Err(ToolgateError::Config(format!(
            "Limit for {} has window_ms = 0",
            scope
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier_limits() {
        let catalog = LimitCatalog::default();

        assert_eq!(
            catalog.default_limit(Tier::Anonymous),
            LimitWindow::new(5, 60_000)
        );
        assert_eq!(
            catalog.default_limit(Tier::Authenticated),
            LimitWindow::new(100, 60_000)
        );
        assert_eq!(
            catalog.default_limit(Tier::Service),
            LimitWindow::new(1000, 60_000)
        );
    }

    #[test]
    fn test_hourly_limit_only_for_anonymous() {
        let catalog = LimitCatalog::default();

        assert_eq!(
            catalog.hourly_limit(Tier::Anonymous),
            Some(LimitWindow::new(100, 3_600_000))
        );
        assert_eq!(catalog.hourly_limit(Tier::Authenticated), None);
        assert_eq!(catalog.hourly_limit(Tier::Service), None);
    }

    #[test]
    fn test_endpoint_limits_stricter_than_tier_defaults() {
        let catalog = LimitCatalog::default();

        let auth = catalog.endpoint_limit("/api/auth").unwrap();
        assert!(auth.max_requests < catalog.default_limit(Tier::Authenticated).max_requests);

        assert!(catalog.endpoint_limit("/api/tools").is_some());
        assert!(catalog.endpoint_limit("/api/tools/stream").is_some());
        assert!(catalog.endpoint_limit("/api/ai").is_some());
        assert!(catalog.endpoint_limit("/api/unlimited").is_none());
    }

    #[test]
    fn test_tool_limits() {
        let catalog = LimitCatalog::default();

        assert_eq!(
            catalog.tool_limit("semantic_search"),
            Some(LimitWindow::new(20, 60_000))
        );
        assert_eq!(
            catalog.tool_limit("generate_summary"),
            Some(LimitWindow::new(10, 60_000))
        );
        assert!(catalog.tool_limit("list_documents").is_none());
    }

    #[test]
    fn test_validate_defaults_pass() {
        assert!(LimitCatalog::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_max_requests() {
        let mut catalog = LimitCatalog::default();
        catalog
            .tools
            .insert("broken".to_string(), LimitWindow::new(0, 60_000));

        let err = catalog.validate().unwrap_err();
        assert!(err.to_string().contains("tool 'broken'"));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut catalog = LimitCatalog::default();
        catalog
            .endpoints
            .insert("/api/broken".to_string(), LimitWindow::new(10, 0));

        let err = catalog.validate().unwrap_err();
        assert!(err.to_string().contains("/api/broken"));
    }

    #[test]
    fn test_from_config_applies_overrides() {
        let mut limits = LimitsConfig::default();
        limits.tiers.insert(Tier::Anonymous, LimitWindow::per_minute(2));
        limits
            .endpoints
            .insert("/api/export".to_string(), LimitWindow::per_minute(1));

        let catalog = LimitCatalog::from_config(&limits).unwrap();

        assert_eq!(catalog.default_limit(Tier::Anonymous).max_requests, 2);
        assert_eq!(
            catalog.endpoint_limit("/api/export"),
            Some(LimitWindow::new(1, 60_000))
        );
        // Untouched entries keep their compiled-in values.
        assert_eq!(catalog.default_limit(Tier::Service).max_requests, 1000);
    }

    #[test]
    fn test_from_config_rejects_invalid_override() {
        let mut limits = LimitsConfig::default();
        limits.tiers.insert(Tier::Service, LimitWindow::new(0, 60_000));

        assert!(LimitCatalog::from_config(&limits).is_err());
    }
}
