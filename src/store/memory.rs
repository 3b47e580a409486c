use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{StateStore, StoreError};

#[derive(Clone, Debug)]
enum Value {
    Hash(HashMap<String, String>),
    Counter(i64),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`StateStore`] used by tests and local development.
///
/// A single mutex guards the whole keyspace, so each trait method is one
/// critical section, mirroring the indivisibility of a Redis script.
/// Expiry is honoured lazily on access, like the Redis semantics it fakes.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`],
    /// simulating a store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|map| map.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<Keyspace<'_>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let map = self.entries.lock().map_err(|_| StoreError::Unavailable)?;
        Ok(Keyspace {
            map,
            now: Instant::now(),
        })
    }
}

/// Locked view of the keyspace with expired keys filtered out.
struct Keyspace<'a> {
    map: MutexGuard<'a, HashMap<String, Entry>>,
    now: Instant,
}

impl Keyspace<'_> {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.now;
        if self.map.get(key).is_some_and(|e| !e.is_live(now)) {
            self.map.remove(key);
        }
        self.map.get_mut(key)
    }

    fn hash(&mut self, key: &str) -> Result<Option<&mut HashMap<String, String>>, StoreError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Hash at `key`, created empty (without expiry) when missing.
    fn hash_or_default(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        if self.live(key).is_none() {
            self.map.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        self.hash(key)?
            .ok_or_else(|| StoreError::UnexpectedReply(format!("hash '{}' vanished", key)))
    }

    /// A TTL past the end of the monotonic clock means "never expires".
    fn expire(&mut self, key: &str, ttl: Duration) {
        let at = self.now.checked_add(ttl);
        if let Some(entry) = self.live(key) {
            entry.expires_at = at;
        }
    }

    fn ttl(&mut self, key: &str) -> Option<Duration> {
        let now = self.now;
        self.live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

fn parse_i64(fields: &HashMap<String, String>, name: &str) -> Option<i64> {
    fields.get(name).and_then(|v| v.parse().ok())
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut keyspace = self.lock()?;
        Ok(keyspace.hash(key)?.cloned().unwrap_or_default())
    }

    async fn hash_set_with_ttl(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut keyspace = self.lock()?;
        let hash = keyspace.hash_or_default(key)?;
        for (name, value) in fields {
            hash.insert((*name).to_string(), value.clone());
        }
        keyspace.expire(key, ttl);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut keyspace = self.lock()?;
        Ok(keyspace.ttl(key))
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let mut keyspace = self.lock()?;
        match keyspace.live(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => Ok(*n),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn take_token(
        &self,
        key: &str,
        max_tokens: u32,
        refill_interval_secs: u64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let mut keyspace = self.lock()?;
        let max_tokens = i64::from(max_tokens);
        let interval = refill_interval_secs.max(1) as i64;

        let (tokens, last_refill) = match keyspace.hash(key)? {
            Some(fields) => (
                parse_i64(fields, "tokens").unwrap_or(max_tokens),
                parse_i64(fields, "last_refill").unwrap_or(0),
            ),
            None => (max_tokens, 0),
        };

        let elapsed = (now - last_refill).max(0);
        let tokens = max_tokens.min(tokens.saturating_add(elapsed / interval));
        if tokens <= 0 {
            return Ok(false);
        }

        let bucket = keyspace.hash_or_default(key)?;
        bucket.insert("tokens".into(), (tokens - 1).to_string());
        bucket.insert("last_refill".into(), last_refill.max(now).to_string());
        keyspace.expire(key, Duration::from_secs(refill_interval_secs * 2));
        Ok(true)
    }

    async fn rotate_credential(
        &self,
        old_key: &str,
        new_key: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut keyspace = self.lock()?;
        let mut fields = match keyspace.hash(old_key)? {
            Some(fields) if fields.get("active").map(String::as_str) == Some("true") => {
                fields.clone()
            }
            _ => return Ok(false),
        };

        fields.insert("active".into(), "true".into());
        keyspace.hash_or_default(new_key)?.extend(fields);
        keyspace.expire(new_key, ttl);

        if let Some(old) = keyspace.hash(old_key)? {
            old.insert("active".into(), "false".into());
        }
        Ok(true)
    }

    async fn revoke_credential(&self, key: &str) -> Result<bool, StoreError> {
        let mut keyspace = self.lock()?;
        match keyspace.hash(key)? {
            Some(fields) => {
                fields.insert("active".into(), "false".into());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_usage(
        &self,
        counter_key: &str,
        owner_key: &str,
    ) -> Result<i64, StoreError> {
        let mut keyspace = self.lock()?;
        let count = match keyspace.live(counter_key) {
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => {
                *n += 1;
                *n
            }
            Some(_) => return Err(StoreError::WrongType(counter_key.to_string())),
            None => {
                keyspace.map.insert(
                    counter_key.to_string(),
                    Entry {
                        value: Value::Counter(1),
                        expires_at: None,
                    },
                );
                1
            }
        };

        if let Some(ttl) = keyspace.ttl(owner_key).filter(|t| !t.is_zero()) {
            keyspace.expire(counter_key, ttl);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_hash_reads_as_empty() {
        let store = MemoryStore::new();
        assert!(store.hash_get_all("nope").await.unwrap().is_empty());
        assert_eq!(store.ttl("nope").await.unwrap(), None);
        assert_eq!(store.counter("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hash_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .hash_set_with_ttl("h", &[("a", "1".to_string())], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(store.hash_get_all("h").await.unwrap()["a"], "1");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.hash_get_all("h").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_missing_key_does_not_create_it() {
        let store = MemoryStore::new();
        assert!(!store.revoke_credential("credential:ghost").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_usage_counter_inherits_owner_ttl() {
        let store = MemoryStore::new();
        store
            .hash_set_with_ttl("owner", &[("active", "true".into())], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.increment_usage("owner:usage", "owner").await.unwrap(), 1);
        assert_eq!(store.increment_usage("owner:usage", "owner").await.unwrap(), 2);

        let ttl = store.ttl("owner:usage").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.increment_usage("c", "missing-owner").await.unwrap();
        assert!(matches!(
            store.hash_get_all("c").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable)));
        assert!(matches!(
            store.take_token("bucket:x", 3, 1, 0).await,
            Err(StoreError::Unavailable)
        ));
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
