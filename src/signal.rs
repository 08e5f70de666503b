//! Transport-facing artifacts derived from a rate limit decision.
//!
//! The limiter produces the decision and metadata only; this module turns a
//! [`RateLimitResult`] into the informational HTTP headers and the JSON-RPC
//! error object the gateway's transport layers attach to responses. The
//! envelope itself (status codes, response framing) stays with the caller.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::error::ToolgateError;
use crate::ratelimit::{BlockedReason, RateLimitResult};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// JSON-RPC error code for an admission denial.
pub const RATE_LIMITED_CODE: i64 = -32000;

/// Seconds until the decision's reset time, floored, never negative.
pub fn retry_after_secs(result: &RateLimitResult) -> i64 {
    (result.reset_at - Utc::now()).num_seconds().max(0)
}

fn format_reset(result: &RateLimitResult) -> String {
    result.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Informational headers for any response where a check occurred.
/// `Retry-After` is present if and only if the request was denied.
pub fn rate_limit_headers(result: &RateLimitResult) -> HashMap<&'static str, String> {
    let mut headers = HashMap::from([
        (HEADER_LIMIT, result.limit.to_string()),
        (HEADER_REMAINING, result.remaining.to_string()),
        (HEADER_RESET, format_reset(result)),
    ]);
    if !result.allowed {
        headers.insert(HEADER_RETRY_AFTER, retry_after_secs(result).to_string());
    }
    headers
}

/// Human-readable denial message. Genuine overuse and a store outage keep
/// the same contract and differ only in wording.
pub fn denial_message(result: &RateLimitResult) -> &'static str {
    match result.blocked_reason {
        Some(BlockedReason::StoreUnavailable) => {
            "Service temporarily unavailable, please retry later"
        }
        _ => "Rate limit exceeded",
    }
}

/// JSON-RPC error object for a denied tool call.
pub fn json_rpc_error(result: &RateLimitResult) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {
            "code": RATE_LIMITED_CODE,
            "message": denial_message(result),
            "data": { "retryAfter": format_reset(result) },
        },
    })
}

/// Map a denied decision to the error the transport layer propagates.
pub fn denial_error(result: &RateLimitResult) -> ToolgateError {
    ToolgateError::RateLimitExceeded {
        limit: result.limit,
        reset_at: result.reset_at,
        reason: result.blocked_reason.unwrap_or(BlockedReason::RateLimit),
    }
}
