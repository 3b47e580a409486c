use std::net::IpAddr;
use std::sync::Arc;

use crate::models::credential::masked;
use crate::store::{StateStore, StoreError};

/// Burst size and refill cadence of one bucket namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimit {
    pub max_tokens: u32,
    pub refill_interval_secs: u64,
}

impl BucketLimit {
    pub const fn new(max_tokens: u32, refill_interval_secs: u64) -> Self {
        Self {
            max_tokens,
            refill_interval_secs,
        }
    }
}

/// Scope key for the coarse per-IP bucket.
pub fn ip_scope(ip: IpAddr) -> String {
    format!("ip:{}", ip)
}

/// Scope key for the per-credential bucket.
pub fn credential_scope(token: &str) -> String {
    format!("key:{}", token)
}

/// Redis-backed token bucket.
///
/// Refill is computed lazily on each attempt from `(tokens, last_refill)`,
/// in whole refill intervals; there is no background ticker. The
/// refill-then-take step runs atomically inside the store, so concurrent
/// attempts on one scope can never admit more than the burst allows.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Takes one token from `scope`'s bucket at unix time `now`.
    ///
    /// Store failures are returned, never read as "allowed".
    pub async fn allow(
        &self,
        scope: &str,
        limit: BucketLimit,
        now: i64,
    ) -> Result<bool, StoreError> {
        let key = format!("bucket:{}", scope);
        let allowed = self
            .store
            .take_token(&key, limit.max_tokens, limit.refill_interval_secs, now)
            .await?;

        if !allowed {
            tracing::debug!(
                rate_limit = true,
                scope = %loggable_scope(scope),
                max_tokens = limit.max_tokens,
                refill_secs = limit.refill_interval_secs,
                "bucket empty"
            );
        }
        Ok(allowed)
    }
}

fn loggable_scope(scope: &str) -> String {
    match scope.strip_prefix("key:") {
        Some(token) => format!("key:{}", masked(token)),
        None => scope.to_string(),
    }
}
