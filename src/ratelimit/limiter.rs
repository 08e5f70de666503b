//! Core rate limiter implementation.
//!
//! The limiter is the only component that combines multiple limit dimensions
//! (tier, hourly ceiling, endpoint, tool) into one admit/deny decision. It
//! holds no counter state itself; correctness under concurrent checks is
//! delegated entirely to the store's atomic increment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::catalog::{LimitCatalog, LimitWindow, Tier};
use super::key::{CounterKey, LimitScope};
use super::policy::DegradationPolicy;
use super::store::{CounterStore, StoreError};
use crate::error::Result;

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockedReason {
    /// The caller is over budget for at least one active window.
    #[serde(rename = "rate_limit")]
    RateLimit,
    /// The counter store was unreachable and the policy is fail-closed.
    #[serde(rename = "redis_unavailable")]
    StoreUnavailable,
}

impl BlockedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::RateLimit => "rate_limit",
            BlockedReason::StoreUnavailable => "redis_unavailable",
        }
    }
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one admission check. Produced fresh per check, never
/// persisted, immutable once returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockedReason>,
}

/// The admission engine: catalog lookups against the counter store, with
/// the degradation policy deciding the outcome when the store is down.
///
/// Safe to call concurrently for the same identifier from many in-flight
/// requests; no application-level lock protects a key, because racing
/// requests may be served by different processes sharing the same store.
pub struct RateLimiter {
    catalog: LimitCatalog,
    store: Arc<dyn CounterStore>,
    policy: DegradationPolicy,
}

impl RateLimiter {
    pub fn new(catalog: LimitCatalog, store: Arc<dyn CounterStore>, policy: DegradationPolicy) -> Self {
        Self {
            catalog,
            store,
            policy,
        }
    }

    /// Check the caller against its tier window plus any hourly ceiling.
    pub async fn check_tier(&self, identifier: &str, tier: Tier) -> RateLimitResult {
        self.check_with_extra(identifier, tier, None).await
    }

    /// Check the tier windows plus the per-route override, if one exists.
    pub async fn check_endpoint(
        &self,
        identifier: &str,
        path: &str,
        tier: Tier,
    ) -> RateLimitResult {
        let extra = self
            .catalog
            .endpoint_limit(path)
            .map(|window| (LimitScope::Endpoint(path.to_string()), window));
        self.check_with_extra(identifier, tier, extra).await
    }

    /// Check the tier windows plus the per-tool override, if one exists.
    pub async fn check_tool(
        &self,
        identifier: &str,
        tool_name: &str,
        tier: Tier,
    ) -> RateLimitResult {
        let extra = self
            .catalog
            .tool_limit(tool_name)
            .map(|window| (LimitScope::Tool(tool_name.to_string()), window));
        self.check_with_extra(identifier, tier, extra).await
    }

    async fn check_with_extra(
        &self,
        identifier: &str,
        tier: Tier,
        extra: Option<(LimitScope, LimitWindow)>,
    ) -> RateLimitResult {
        let tier_window = self.catalog.default_limit(tier);
        let tier_scope = LimitScope::Tier(tier);

        // Every window reached is incremented, even after an earlier window
        // has already denied: a denied call still consumes budget, which
        // keeps retry storms from probing for free.
        let mut decision = match self.consume(identifier, tier_scope.clone(), tier_window).await {
            Ok(result) => result,
            Err(e) => return self.degrade(tier_window, &e),
        };

        if let Some(hourly_window) = self.catalog.hourly_limit(tier) {
            match self.consume(identifier, tier_scope, hourly_window).await {
                Ok(result) => decision = combine(decision, result),
                Err(e) => return self.degrade(tier_window, &e),
            }
        }

        if let Some((scope, window)) = extra {
            match self.consume(identifier, scope, window).await {
                Ok(result) => decision = combine(decision, result),
                Err(e) => return self.degrade(tier_window, &e),
            }
        }

        if !decision.allowed {
            warn!(
                identifier = identifier,
                tier = %tier,
                limit = decision.limit,
                reset_at = %decision.reset_at,
                "Rate limit hit"
            );
        }

        decision
    }

    /// Like [`check_tier`] but non-consuming: peeks the counters instead of
    /// incrementing them.
    ///
    /// A peek cannot distinguish "no traffic yet" from "store down," so store
    /// failures route through the same degradation policy as a check.
    ///
    /// [`check_tier`]: RateLimiter::check_tier
    pub async fn status(&self, identifier: &str, tier: Tier) -> RateLimitResult {
        let tier_window = self.catalog.default_limit(tier);
        let tier_scope = LimitScope::Tier(tier);

        let primary = match self.observe(identifier, tier_scope.clone(), tier_window).await {
            Ok(result) => result,
            Err(e) => return self.degrade(tier_window, &e),
        };

        let Some(hourly_window) = self.catalog.hourly_limit(tier) else {
            return primary;
        };
        match self.observe(identifier, tier_scope, hourly_window).await {
            Ok(result) => combine(primary, result),
            Err(e) => self.degrade(tier_window, &e),
        }
    }

    /// Delete the tier counter (and any hourly counter) for an identifier.
    ///
    /// Administrative and test surface only, never called from the request
    /// path. Idempotent: absent counters are not an error.
    pub async fn reset(&self, identifier: &str, tier: Tier) -> Result<()> {
        let tier_window = self.catalog.default_limit(tier);
        let key = CounterKey::new(identifier, LimitScope::Tier(tier), tier_window.window_ms);
        self.store.reset(&key).await?;

        if let Some(hourly_window) = self.catalog.hourly_limit(tier) {
            let key = CounterKey::new(identifier, LimitScope::Tier(tier), hourly_window.window_ms);
            self.store.reset(&key).await?;
        }

        debug!(identifier = identifier, tier = %tier, "Rate limit counters reset");
        Ok(())
    }

    /// Increment one window and derive its sub-decision.
    ///
    /// Inclusive counting: with `max_requests = N`, the N-th increment in a
    /// window is allowed and the (N+1)-th is denied.
    async fn consume(
        &self,
        identifier: &str,
        scope: LimitScope,
        window: LimitWindow,
    ) -> std::result::Result<RateLimitResult, StoreError> {
        let key = CounterKey::new(identifier, scope, window.window_ms);
        trace!(key = %key, "Checking rate limit window");

        let record = self.store.increment_and_get(&key, window.window_ms).await?;
        let allowed = record.count <= window.max_requests;
        if !allowed {
            debug!(
                key = %key,
                count = record.count,
                limit = window.max_requests,
                "Window exceeded"
            );
        }

        Ok(RateLimitResult {
            allowed,
            remaining: window.max_requests.saturating_sub(record.count),
            reset_at: record.reset_at,
            limit: window.max_requests,
            blocked_reason: (!allowed).then_some(BlockedReason::RateLimit),
        })
    }

    /// Read one window without consuming budget. An absent counter reads as
    /// a fresh window.
    async fn observe(
        &self,
        identifier: &str,
        scope: LimitScope,
        window: LimitWindow,
    ) -> std::result::Result<RateLimitResult, StoreError> {
        let key = CounterKey::new(identifier, scope, window.window_ms);

        Ok(match self.store.peek(&key).await? {
            Some(record) => {
                let remaining = window.max_requests.saturating_sub(record.count);
                RateLimitResult {
                    allowed: remaining > 0,
                    remaining,
                    reset_at: record.reset_at,
                    limit: window.max_requests,
                    blocked_reason: (remaining == 0).then_some(BlockedReason::RateLimit),
                }
            }
            None => RateLimitResult {
                allowed: true,
                remaining: window.max_requests,
                reset_at: Utc::now() + chrono::Duration::milliseconds(window.window_ms as i64),
                limit: window.max_requests,
                blocked_reason: None,
            },
        })
    }

    fn degrade(&self, window: LimitWindow, error: &StoreError) -> RateLimitResult {
        warn!(error = %error, "Counter store call failed, applying degradation policy");
        self.policy.degraded(window)
    }
}

/// Combine two sub-decisions into one.
///
/// `allowed` is the AND of both; `remaining` the minimum. The advertised
/// `limit`/`reset_at` come from the blocking sub-check, or when both block,
/// from the one with the sooner `reset_at` so the caller is told the
/// earliest legitimate retry time. When neither blocks, the limit of the
/// tightest active constraint is surfaced and the primary window's
/// `reset_at` stands as the next decision point.
fn combine(primary: RateLimitResult, secondary: RateLimitResult) -> RateLimitResult {
    let allowed = primary.allowed && secondary.allowed;
    let remaining = primary.remaining.min(secondary.remaining);

    match (primary.allowed, secondary.allowed) {
        (true, true) => {
            let tight = if secondary.remaining < primary.remaining {
                secondary
            } else {
                primary
            };
            RateLimitResult {
                allowed,
                remaining,
                reset_at: primary.reset_at,
                limit: tight.limit,
                blocked_reason: None,
            }
        }
        (false, true) => RateLimitResult {
            allowed,
            remaining,
            ..primary
        },
        (true, false) => RateLimitResult {
            allowed,
            remaining,
            ..secondary
        },
        (false, false) => {
            let sooner = if secondary.reset_at < primary.reset_at {
                secondary
            } else {
                primary
            };
            RateLimitResult {
                allowed,
                remaining,
                ..sooner
            }
        }
    }
}
