//! Script-level tests against a live Redis.
//!
//! **Requirements:**
//! - Redis running at REDIS_URL (e.g. `docker run -p 6379:6379 redis:7`)
//!
//! Every test returns early when REDIS_URL is unset, so `cargo test` stays
//! green on machines without Redis. Keys are namespaced per test run.

use std::sync::Arc;
use std::time::Duration;

use maskgate::middleware::rate_limit::{BucketLimit, RateLimiter};
use maskgate::models::credential::Plan;
use maskgate::store::credentials::{record_key, CredentialError, CredentialStore};
use maskgate::store::{RedisStore, StateStore};

async fn redis() -> Option<Arc<dyn StateStore>> {
    let url = std::env::var("REDIS_URL").ok()?;
    let store = RedisStore::connect(&url, Duration::from_secs(2))
        .await
        .expect("REDIS_URL is set but Redis is unreachable");
    Some(Arc::new(store))
}

fn scope(name: &str) -> String {
    format!("test:{}:{}", name, uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_bucket_script_refills_in_whole_intervals() {
    let Some(store) = redis().await else { return };
    let limiter = RateLimiter::new(store.clone());
    let limit = BucketLimit::new(3, 1);
    let s = scope("bucket");
    let t0 = 1_700_000_000;

    for _ in 0..3 {
        assert!(limiter.allow(&s, limit, t0).await.unwrap());
    }
    assert!(!limiter.allow(&s, limit, t0).await.unwrap());
    assert!(limiter.allow(&s, limit, t0 + 1).await.unwrap());
    assert!(!limiter.allow(&s, limit, t0 + 1).await.unwrap());

    let ttl = store.ttl(&format!("bucket:{}", s)).await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(2));
}

#[tokio::test]
async fn test_bucket_script_is_atomic_under_contention() {
    let Some(store) = redis().await else { return };
    let limiter = Arc::new(RateLimiter::new(store));
    let limit = BucketLimit::new(5, 3600);
    let s = scope("contended");
    let now = chrono::Utc::now().timestamp();

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let limiter = limiter.clone();
            let s = s.clone();
            tokio::spawn(async move { limiter.allow(&s, limit, now).await.unwrap() })
        })
        .collect();

    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_credential_lifecycle_against_redis() {
    let Some(store) = redis().await else { return };
    let creds = CredentialStore::new(store.clone(), Duration::from_secs(600));

    let old = creds.issue(Plan::Ultra).await.unwrap();
    assert_eq!(creds.record_usage(&old).await.unwrap(), 1);
    let counter_ttl = store
        .ttl(&format!("{}:usage", record_key(&old)))
        .await
        .unwrap()
        .unwrap();
    assert!(counter_ttl > Duration::from_secs(590));

    let new = creds.rotate(&old).await.unwrap();
    assert!(matches!(
        creds.validate(&old).await,
        Err(CredentialError::NotFound)
    ));
    let record = creds.validate(&new).await.unwrap();
    assert_eq!(record.plan, Plan::Ultra);
    assert_eq!(creds.usage_count(&new).await.unwrap(), 0);

    creds.revoke(&new).await.unwrap();
    creds.revoke(&new).await.unwrap();
    assert!(!creds.lookup(&new).await.unwrap().active);
}

#[tokio::test]
async fn test_concurrent_rotation_has_one_winner_against_redis() {
    let Some(store) = redis().await else { return };
    let creds = Arc::new(CredentialStore::new(store, Duration::from_secs(600)));
    let old = creds.issue(Plan::Free).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let creds = creds.clone();
            let old = old.clone();
            tokio::spawn(async move { creds.rotate(&old).await })
        })
        .collect();

    let mut winners = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => winners += 1,
            Err(CredentialError::NotFound) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_revoke_does_not_resurrect_missing_record() {
    let Some(store) = redis().await else { return };
    let key = record_key(&scope("ghost"));
    assert!(!store.revoke_credential(&key).await.unwrap());
    assert!(store.hash_get_all(&key).await.unwrap().is_empty());
}
