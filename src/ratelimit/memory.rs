//! In-process counter store.
//!
//! Backs tests and single-instance deployments that run without a shared
//! store. Atomicity per key comes from the map's entry locking: an
//! increment-or-initialize holds the entry for the duration of the update,
//! so concurrent increments for the same key never lose updates.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::key::CounterKey;
use super::store::{CounterRecord, CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    reset_at_ms: i64,
}

/// Counter store backed by an in-process concurrent map.
///
/// An increment that lands on an expired slot reuses it for the new window;
/// a peek that finds one removes it. Long-idle keys that nothing touches
/// again are reclaimed by [`purge_expired`], which callers run on whatever
/// interval suits their deployment. The clock can be skewed forward with
/// [`advance`] and the backend toggled unreachable with [`set_available`];
/// both exist for test harnesses and are never called from the request path.
///
/// [`purge_expired`]: MemoryCounterStore::purge_expired
/// [`advance`]: MemoryCounterStore::advance
/// [`set_available`]: MemoryCounterStore::set_available
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
    clock_skew_ms: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.clock_skew_ms.load(Ordering::SeqCst)
    }

    /// Skew the store's clock forward, as if `duration` had elapsed.
    pub fn advance(&self, duration: Duration) {
        self.clock_skew_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    /// Simulate the backend going down (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Drop every slot whose window has passed.
    ///
    /// Increments and peeks already handle the expired slots they touch;
    /// this sweep reclaims the ones nothing touches again, which matters
    /// when identifiers are high-cardinality (anonymous clients keyed by
    /// address).
    pub fn purge_expired(&self) {
        let now_ms = self.now_ms();
        self.slots.retain(|_, slot| now_ms < slot.reset_at_ms);
    }

    /// Number of live (possibly expired but not yet dropped) counters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store marked offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_and_get(
        &self,
        key: &CounterKey,
        window_ms: u64,
    ) -> Result<CounterRecord, StoreError> {
        self.check_available()?;

        let now_ms = self.now_ms();
        let mut slot = self.slots.entry(key.to_store_key()).or_insert(Slot {
            count: 0,
            reset_at_ms: now_ms + window_ms as i64,
        });

        // A slot past its expiry belongs to the old window; the increment
        // that finds it starts a fresh window.
        if now_ms >= slot.reset_at_ms {
            slot.count = 0;
            slot.reset_at_ms = now_ms + window_ms as i64;
        }
        slot.count += 1;

        Ok(CounterRecord {
            count: slot.count,
            reset_at: to_datetime(slot.reset_at_ms),
        })
    }

    async fn peek(&self, key: &CounterKey) -> Result<Option<CounterRecord>, StoreError> {
        self.check_available()?;

        let store_key = key.to_store_key();
        let now_ms = self.now_ms();

        if let Some(slot) = self.slots.get(&store_key) {
            if now_ms < slot.reset_at_ms {
                return Ok(Some(CounterRecord {
                    count: slot.count,
                    reset_at: to_datetime(slot.reset_at_ms),
                }));
            }
        }

        // Expired counters read as absent and are dropped on the way out.
        // The read guard above is released before this takes the write lock;
        // the predicate re-checks expiry in case a concurrent increment
        // started a fresh window in between.
        self.slots
            .remove_if(&store_key, |_, slot| now_ms >= slot.reset_at_ms);
        Ok(None)
    }

    async fn reset(&self, key: &CounterKey) -> Result<(), StoreError> {
        self.check_available()?;
        self.slots.remove(&key.to_store_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::catalog::Tier;
    use crate::ratelimit::key::LimitScope;

    fn test_key(identifier: &str) -> CounterKey {
        CounterKey::new(identifier, LimitScope::Tier(Tier::Anonymous), 60_000)
    }

    #[tokio::test]
    async fn test_first_increment_initializes_window() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        let record = store.increment_and_get(&key, 60_000).await.unwrap();

        assert_eq!(record.count, 1);
        assert!(record.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn test_subsequent_increments_keep_reset_at() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        let first = store.increment_and_get(&key, 60_000).await.unwrap();
        let second = store.increment_and_get(&key, 60_000).await.unwrap();

        assert_eq!(second.count, 2);
        assert_eq!(second.reset_at, first.reset_at);
    }

    #[tokio::test]
    async fn test_expired_window_reinitializes() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        for _ in 0..5 {
            store.increment_and_get(&key, 60_000).await.unwrap();
        }
        store.advance(Duration::from_millis(60_001));

        let record = store.increment_and_get(&key, 60_000).await.unwrap();
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_peek_does_not_mutate() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        assert_eq!(store.peek(&key).await.unwrap(), None);

        store.increment_and_get(&key, 60_000).await.unwrap();
        let peeked = store.peek(&key).await.unwrap().unwrap();
        assert_eq!(peeked.count, 1);

        // Peeking again returns the same count.
        let peeked = store.peek(&key).await.unwrap().unwrap();
        assert_eq!(peeked.count, 1);
    }

    #[tokio::test]
    async fn test_peek_expired_reads_as_absent() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        store.increment_and_get(&key, 60_000).await.unwrap();
        store.advance(Duration::from_millis(60_001));

        assert_eq!(store.peek(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_peek_drops_expired_slot() {
        let store = MemoryCounterStore::new();

        for i in 0..100 {
            let key = test_key(&format!("u{i}"));
            store.increment_and_get(&key, 60_000).await.unwrap();
        }
        assert_eq!(store.len(), 100);
        store.advance(Duration::from_millis(60_001));

        for i in 0..100 {
            let key = test_key(&format!("u{i}"));
            assert_eq!(store.peek(&key).await.unwrap(), None);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_windows() {
        let store = MemoryCounterStore::new();

        store
            .increment_and_get(&test_key("stale"), 60_000)
            .await
            .unwrap();
        store.advance(Duration::from_millis(60_001));
        store
            .increment_and_get(&test_key("fresh"), 60_000)
            .await
            .unwrap();

        store.purge_expired();

        assert_eq!(store.len(), 1);
        let live = store.peek(&test_key("fresh")).await.unwrap().unwrap();
        assert_eq!(live.count, 1);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        // Resetting a key that never existed is fine.
        store.reset(&key).await.unwrap();

        store.increment_and_get(&key, 60_000).await.unwrap();
        store.reset(&key).await.unwrap();
        store.reset(&key).await.unwrap();

        let record = store.increment_and_get(&key, 60_000).await.unwrap();
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryCounterStore::new();
        let key = test_key("u1");

        store.set_available(false);
        assert!(store.increment_and_get(&key, 60_000).await.is_err());
        assert!(store.peek(&key).await.is_err());
        assert!(store.reset(&key).await.is_err());

        store.set_available(true);
        assert!(store.increment_and_get(&key, 60_000).await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryCounterStore::new();

        store
            .increment_and_get(&test_key("u1"), 60_000)
            .await
            .unwrap();
        let other = store
            .increment_and_get(&test_key("u2"), 60_000)
            .await
            .unwrap();

        assert_eq!(other.count, 1);
        assert_eq!(store.len(), 2);
    }
}
