//! Redis counter store adapter.
//!
//! Redis has no single native "increment or initialize with expiry" command,
//! so the increment runs as a server-side Lua script to preserve the
//! atomicity the [`CounterStore`] contract requires. Every round trip is
//! capped by a short operation timeout so a slow or partitioned Redis
//! degrades into a policy decision instead of stalling the request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::debug;

use super::key::CounterKey;
use super::store::{CounterRecord, CounterStore, StoreError};

/// Default per-operation timeout, well under typical request budgets.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(50);

/// INCR, first-hit PEXPIRE, and PTTL as one atomic unit.
const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
"#;

/// Counter store backed by a shared Redis instance.
///
/// Constructed explicitly at process bootstrap and injected into the
/// [`RateLimiter`](super::RateLimiter); connection lifecycle is owned by the
/// caller, not created lazily on first use.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    increment_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis at `url` with the default operation timeout.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeout(url, DEFAULT_OP_TIMEOUT).await
    }

    /// Connect to Redis at `url`, capping every store operation at
    /// `op_timeout`.
    pub async fn connect_with_timeout(
        url: &str,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(url = %url, timeout_ms = op_timeout.as_millis() as u64, "Connected to Redis counter store");

        Ok(Self {
            conn,
            op_timeout,
            increment_script: Script::new(INCREMENT_WITH_EXPIRY),
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(
        &self,
        key: &CounterKey,
        window_ms: u64,
    ) -> Result<CounterRecord, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.increment_script.prepare_invoke();
        invocation.key(key.to_store_key()).arg(window_ms);

        let (count, ttl_ms): (i64, i64) =
            self.with_timeout(invocation.invoke_async(&mut conn)).await?;

        Ok(CounterRecord {
            count: count.max(0) as u64,
            reset_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms.max(0)),
        })
    }

    async fn peek(&self, key: &CounterKey) -> Result<Option<CounterRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let store_key = key.to_store_key();

        let mut pipe = redis::pipe();
        pipe.get(&store_key).cmd("PTTL").arg(&store_key);
        let (count, ttl_ms): (Option<i64>, i64) =
            self.with_timeout(pipe.query_async(&mut conn)).await?;

        // The pipeline is not atomic: the key can expire between GET and
        // PTTL, in which case PTTL reports -2. A negative TTL means the
        // window is already over, so the counter reads as absent.
        match count {
            Some(count) if ttl_ms >= 0 => Ok(Some(CounterRecord {
                count: count.max(0) as u64,
                reset_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms),
            })),
            _ => Ok(None),
        }
    }

    async fn reset(&self, key: &CounterKey) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key.to_store_key());

        // DEL on an absent key returns 0; either way the counter is gone.
        let _deleted: i64 = self.with_timeout(cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}
