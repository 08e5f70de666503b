//! Counter key derivation.

use super::catalog::Tier;

/// Key prefix shared by every counter this crate owns in the store.
const KEY_PREFIX: &str = "toolgate:ratelimit";

/// The dimension being limited, independent of the caller identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimitScope {
    /// Global per-tier ceiling
    Tier(Tier),
    /// Per logical route
    Endpoint(String),
    /// Per named tool/operation
    Tool(String),
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::Tier(tier) => write!(f, "tier:{}", tier),
            LimitScope::Endpoint(path) => write!(f, "endpoint:{}", path),
            LimitScope::Tool(name) => write!(f, "tool:{}", name),
        }
    }
}

/// A key that uniquely identifies one counter in the store.
///
/// Derived deterministically from `(identifier, scope, window_ms)`: the same
/// identifier and scope land on the same counter within a window length, and
/// on an independent counter for a different window length (so a one-minute
/// and an hourly ceiling for the same caller never collide).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    identifier: String,
    scope: LimitScope,
    window_ms: u64,
}

impl CounterKey {
    pub fn new(identifier: &str, scope: LimitScope, window_ms: u64) -> Self {
        Self {
            identifier: identifier.to_string(),
            scope,
            window_ms,
        }
    }

    /// The composite string form used as the store key.
    pub fn to_store_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            KEY_PREFIX, self.scope, self.identifier, self.window_ms
        )
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_key_format() {
        let key = CounterKey::new("ip:203.0.113.1", LimitScope::Tier(Tier::Anonymous), 60_000);
        assert_eq!(
            key.to_store_key(),
            "toolgate:ratelimit:tier:anonymous:ip:203.0.113.1:60000"
        );
    }

    #[test]
    fn test_scope_kinds_produce_distinct_keys() {
        let tier = CounterKey::new("u1", LimitScope::Tier(Tier::Authenticated), 60_000);
        let endpoint = CounterKey::new(
            "u1",
            LimitScope::Endpoint("/api/auth".to_string()),
            60_000,
        );
        let tool = CounterKey::new("u1", LimitScope::Tool("semantic_search".to_string()), 60_000);

        assert_ne!(tier.to_store_key(), endpoint.to_store_key());
        assert_ne!(endpoint.to_store_key(), tool.to_store_key());
    }

    #[test]
    fn test_different_windows_are_independent_counters() {
        let minute = CounterKey::new("u1", LimitScope::Tier(Tier::Anonymous), 60_000);
        let hour = CounterKey::new("u1", LimitScope::Tier(Tier::Anonymous), 3_600_000);

        assert_ne!(minute.to_store_key(), hour.to_store_key());
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = CounterKey::new("u1", LimitScope::Tool("generate_summary".to_string()), 60_000);
        let b = CounterKey::new("u1", LimitScope::Tool("generate_summary".to_string()), 60_000);
        assert_eq!(a, b);
        assert_eq!(a.to_store_key(), b.to_store_key());
    }
}
