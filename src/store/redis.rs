use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};

use super::{StateStore, StoreError};

// KEYS[1] = bucket, ARGV = max_tokens, refill_secs, now
// Returns 1 when a token was taken, 0 otherwise.
static TAKE_TOKEN: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local max_tokens = tonumber(ARGV[1])
        local refill_secs = tonumber(ARGV[2])
        local now = tonumber(ARGV[3])
        local bucket = redis.call("HMGET", KEYS[1], "tokens", "last_refill")
        local tokens = tonumber(bucket[1]) or max_tokens
        local last_refill = tonumber(bucket[2]) or 0
        local elapsed = math.max(0, now - last_refill)
        tokens = math.min(max_tokens, tokens + math.floor(elapsed / refill_secs))
        if tokens <= 0 then
            return 0
        end
        redis.call("HSET", KEYS[1], "tokens", tokens - 1, "last_refill", math.max(last_refill, now))
        redis.call("EXPIRE", KEYS[1], refill_secs * 2)
        return 1
    "#,
    )
});

// KEYS[1] = old credential, KEYS[2] = new credential, ARGV[1] = ttl secs
static ROTATE_CREDENTIAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call("HGET", KEYS[1], "active") ~= "true" then
            return 0
        end
        local fields = redis.call("HGETALL", KEYS[1])
        redis.call("HSET", KEYS[2], unpack(fields))
        redis.call("HSET", KEYS[2], "active", "true")
        redis.call("EXPIRE", KEYS[2], ARGV[1])
        redis.call("HSET", KEYS[1], "active", "false")
        return 1
    "#,
    )
});

// KEYS[1] = credential. HSET alone would resurrect an expired key without a TTL.
static REVOKE_CREDENTIAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return 0
        end
        redis.call("HSET", KEYS[1], "active", "false")
        return 1
    "#,
    )
});

// KEYS[1] = usage counter, KEYS[2] = owning credential
static INCREMENT_USAGE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local count = redis.call("INCR", KEYS[1])
        local ttl = redis.call("PTTL", KEYS[2])
        if ttl > 0 then
            redis.call("PEXPIRE", KEYS[1], ttl)
        end
        return count
    "#,
    )
});

/// [`StateStore`] backed by a Redis `ConnectionManager`.
///
/// The manager reconnects on its own; every call is bounded by
/// `op_timeout` so a stalled server surfaces as [`StoreError::Timeout`]
/// instead of hanging the request.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to redis after {:?}", op_timeout))??;
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        let reply: String = self.bounded("ping", cmd.query_async(&mut conn)).await?;
        if reply != "PONG" {
            return Err(StoreError::UnexpectedReply(reply));
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("hgetall", conn.hgetall(key)).await
    }

    async fn hash_set_with_ttl(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(key, fields)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore();
        self.bounded("hset+expire", pipe.query_async::<_, ()>(&mut conn))
            .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("TTL");
        cmd.arg(key);
        let secs: i64 = self.bounded("ttl", cmd.query_async(&mut conn)).await?;
        // -2: missing key, -1: no expiry
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = self.bounded("get", conn.get(key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn take_token(
        &self,
        key: &str,
        max_tokens: u32,
        refill_interval_secs: u64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = TAKE_TOKEN.prepare_invoke();
        invocation
            .key(key)
            .arg(max_tokens)
            .arg(refill_interval_secs)
            .arg(now);
        let taken: i64 = self
            .bounded("take_token", invocation.invoke_async(&mut conn))
            .await?;
        Ok(taken == 1)
    }

    async fn rotate_credential(
        &self,
        old_key: &str,
        new_key: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = ROTATE_CREDENTIAL.prepare_invoke();
        invocation
            .key(old_key)
            .key(new_key)
            .arg(ttl.as_secs().max(1));
        let rotated: i64 = self
            .bounded("rotate_credential", invocation.invoke_async(&mut conn))
            .await?;
        Ok(rotated == 1)
    }

    async fn revoke_credential(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = REVOKE_CREDENTIAL.prepare_invoke();
        invocation.key(key);
        let revoked: i64 = self
            .bounded("revoke_credential", invocation.invoke_async(&mut conn))
            .await?;
        Ok(revoked == 1)
    }

    async fn increment_usage(
        &self,
        counter_key: &str,
        owner_key: &str,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = INCREMENT_USAGE.prepare_invoke();
        invocation.key(counter_key).key(owner_key);
        self.bounded("increment_usage", invocation.invoke_async(&mut conn))
            .await
    }
}
