//! Rate limiting logic and state management.

mod catalog;
mod key;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod store;

pub use catalog::{LimitCatalog, LimitWindow, Tier};
pub use key::{CounterKey, LimitScope};
pub use limiter::{BlockedReason, RateLimitResult, RateLimiter};
pub use memory::MemoryCounterStore;
pub use policy::{DegradationPolicy, FailMode};
pub use redis_store::RedisCounterStore;
pub use store::{CounterRecord, CounterStore, StoreError};
