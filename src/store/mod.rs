//! Shared state store.
//!
//! Every piece of cross-request state (rate-limit buckets, credential
//! records, usage counters) lives in an external key-value store. The
//! service never caches it locally; handlers reach it through the
//! [`StateStore`] capability so tests can swap in [`MemoryStore`].
//!
//! ## Key patterns
//!
//! ```text
//! bucket:{scope}              → hash {tokens, last_refill}     TTL 2 × refill interval
//! credential:{token}          → hash {active, plan, created_at} TTL 30 days
//! credential:{token}:usage    → integer counter                 TTL follows the credential
//! ```

pub mod credentials;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation '{op}' timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store unavailable")]
    Unavailable,

    #[error("key '{0}' holds a value of the wrong type")]
    WrongType(String),

    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Operations the access-control layer needs from the shared store.
///
/// The plain reads and writes are single round trips. The remaining
/// methods are read-modify-write units that implementations must execute
/// indivisibly against the store (a server-side script for Redis, a
/// single critical section for the in-memory fake).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Round trip used by readiness checks and start-up.
    async fn ping(&self) -> Result<(), StoreError>;

    /// All fields of a hash. A missing key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Writes `fields` and sets the key's expiry in one transaction.
    async fn hash_set_with_ttl(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remaining time-to-live. `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Integer counter value, `0` when absent.
    async fn counter(&self, key: &str) -> Result<i64, StoreError>;

    /// Lazy-refill token bucket: refill by whole intervals elapsed since
    /// `last_refill`, then take one token if any is left.
    ///
    /// Returns `true` when a token was taken. A denial leaves the bucket
    /// untouched.
    async fn take_token(
        &self,
        key: &str,
        max_tokens: u32,
        refill_interval_secs: u64,
        now: i64,
    ) -> Result<bool, StoreError>;

    /// Copies every field of the active credential hash at `old_key` into
    /// `new_key` (marked active, expiring after `ttl`) and disables
    /// `old_key`.
    ///
    /// Returns `false` without writing anything when `old_key` is missing
    /// or not active, which is how racing rotations of one credential
    /// lose.
    async fn rotate_credential(
        &self,
        old_key: &str,
        new_key: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Sets `active=false` on an existing credential hash, leaving its TTL
    /// alone. Returns `false` if the key does not exist.
    async fn revoke_credential(&self, key: &str) -> Result<bool, StoreError>;

    /// Increments `counter_key` and aligns its expiry with `owner_key`.
    async fn increment_usage(&self, counter_key: &str, owner_key: &str)
        -> Result<i64, StoreError>;
}
