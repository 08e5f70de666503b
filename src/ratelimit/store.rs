//! Counter store abstraction.
//!
//! The store is the only place a rate limit check performs I/O. Every
//! operation must complete within a short bounded timeout; a slow or
//! partitioned backend surfaces as [`StoreError`] and is routed to the
//! degradation policy, never retried here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::key::CounterKey;

/// A counter's state as held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Number of increments observed in the current window
    pub count: u64,
    /// When the current window expires and the counter resets
    pub reset_at: DateTime<Utc>,
}

/// Errors from the counter backend. Both variants are treated identically by
/// the rate limiter: the check degrades, it never blocks or retries.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Atomic counter backend with bounded-latency operations.
///
/// Implementations must guarantee that [`increment_and_get`] is a single
/// atomic operation from the caller's perspective: concurrent increments for
/// the same key are serialized by the store, with no read-then-write race.
/// No cross-key transactions are required; each key is independent.
///
/// [`increment_and_get`]: CounterStore::increment_and_get
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`.
    ///
    /// The first increment observed for the current window initializes
    /// `count = 1` and `reset_at = now + window_ms`; later increments bump
    /// the count and leave `reset_at` unchanged. The record expires on its
    /// own at `reset_at`.
    async fn increment_and_get(
        &self,
        key: &CounterKey,
        window_ms: u64,
    ) -> Result<CounterRecord, StoreError>;

    /// Non-mutating lookup. Returns `None` when no live counter exists.
    async fn peek(&self, key: &CounterKey) -> Result<Option<CounterRecord>, StoreError>;

    /// Delete the counter. Idempotent; absent keys are not an error.
    async fn reset(&self, key: &CounterKey) -> Result<(), StoreError>;
}
