//! Degradation policy for counter store outages.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::catalog::LimitWindow;
use super::limiter::{BlockedReason, RateLimitResult};

/// Fallback window reported to denied callers while the store is down.
pub const DEFAULT_FALLBACK_WINDOW: Duration = Duration::from_secs(60);

/// What a check decides when the counter store is unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Allow everything: availability over strict enforcement.
    Open,
    /// Deny everything: protect the backend when budgets cannot be verified.
    #[default]
    Closed,
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(format!(
                "invalid fail mode '{}', expected 'open' or 'closed'",
                other
            )),
        }
    }
}

/// Decides the outcome of a check after a store call has already failed.
///
/// The mode is fixed at process start and injected; this policy never
/// contacts the store itself.
#[derive(Debug, Clone, Copy)]
pub struct DegradationPolicy {
    mode: FailMode,
    fallback_window: Duration,
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self::new(FailMode::default())
    }
}

impl DegradationPolicy {
    pub fn new(mode: FailMode) -> Self {
        Self {
            mode,
            fallback_window: DEFAULT_FALLBACK_WINDOW,
        }
    }

    pub fn with_fallback_window(mode: FailMode, fallback_window: Duration) -> Self {
        Self {
            mode,
            fallback_window,
        }
    }

    pub fn mode(&self) -> FailMode {
        self.mode
    }

    /// Produce the degraded decision for a check that could not reach the
    /// store.
    pub fn degraded(&self, limit: LimitWindow) -> RateLimitResult {
        let now = Utc::now();
        match self.mode {
            FailMode::Open => RateLimitResult {
                allowed: true,
                remaining: limit.max_requests,
                reset_at: now + chrono::Duration::milliseconds(limit.window_ms as i64),
                limit: limit.max_requests,
                blocked_reason: None,
            },
            FailMode::Closed => {
                warn!(
                    fallback_secs = self.fallback_window.as_secs(),
                    "Counter store unreachable, denying request (fail-closed)"
                );
                RateLimitResult {
                    allowed: false,
                    remaining: 0,
                    reset_at: now
                        + chrono::Duration::milliseconds(self.fallback_window.as_millis() as i64),
                    limit: limit.max_requests,
                    blocked_reason: Some(BlockedReason::StoreUnavailable),
                }
            }
        }
    }
}
