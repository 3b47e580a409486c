//! maskgate: PII masking API behind issued credentials and
//! distributed token-bucket rate limits.
//!
//! The binary in `main.rs` wires these modules to Redis; integration tests
//! in `tests/` wire them to [`store::MemoryStore`].

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod errors;
pub mod masking;
pub mod middleware;
pub mod models;
pub mod store;

use middleware::admin::PlanPolicy;
use middleware::metrics::PrometheusRecorder;
use middleware::rate_limit::RateLimiter;
use store::credentials::CredentialStore;
use store::StateStore;

/// Shared application state passed to handlers and middleware.
///
/// Holds no mutable request state of its own: all coordination between
/// requests (and between instances) goes through `store`.
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub credentials: CredentialStore,
    pub limiter: RateLimiter,
    pub plans: PlanPolicy,
    pub metrics: PrometheusRecorder,
    pub config: config::Config,
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>, config: config::Config) -> anyhow::Result<Self> {
        Ok(Self {
            credentials: CredentialStore::new(store.clone(), config.credential_ttl),
            limiter: RateLimiter::new(store.clone()),
            plans: PlanPolicy::new(config.admin_token.clone()),
            metrics: PrometheusRecorder::new()?,
            store,
            config,
        })
    }
}
