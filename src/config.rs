use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::middleware::rate_limit::BucketLimit;
use crate::store::credentials::DEFAULT_CREDENTIAL_TTL;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Secret that must accompany a request for a paid plan at issuance.
    /// Set via MASKGATE_ADMIN_TOKEN. Unset disables plan elevation.
    pub admin_token: Option<String>,
    /// Coarse bucket applied to every request, keyed by client IP.
    pub ip_limit: BucketLimit,
    /// Per-credential bucket applied on gated routes.
    pub key_limit: BucketLimit,
    pub credential_ttl: Duration,
    /// Upper bound on every shared-store round trip.
    pub store_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://127.0.0.1:6379".into(),
            admin_token: None,
            ip_limit: BucketLimit::new(3, 1),
            key_limit: BucketLimit::new(3, 1),
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
            store_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(10),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Builds a config from a variable lookup. `load()` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let admin_token = lookup("MASKGATE_ADMIN_TOKEN").filter(|t| !t.trim().is_empty());
        if admin_token.is_none() {
            let env_mode = lookup("MASKGATE_ENV").unwrap_or_default();
            if env_mode == "production" {
                anyhow::bail!(
                    "MASKGATE_ADMIN_TOKEN is not set. \
                     Set an admin token before running in production."
                );
            }
        }

        let ip_limit = BucketLimit::new(
            parse_or(&lookup, "MASKGATE_IP_BURST", defaults.ip_limit.max_tokens)?,
            parse_or(
                &lookup,
                "MASKGATE_IP_REFILL_SECS",
                defaults.ip_limit.refill_interval_secs,
            )?,
        );
        let key_limit = BucketLimit::new(
            parse_or(&lookup, "MASKGATE_KEY_BURST", defaults.key_limit.max_tokens)?,
            parse_or(
                &lookup,
                "MASKGATE_KEY_REFILL_SECS",
                defaults.key_limit.refill_interval_secs,
            )?,
        );
        for (name, limit) in [("IP", ip_limit), ("KEY", key_limit)] {
            if limit.max_tokens == 0 || limit.refill_interval_secs == 0 {
                anyhow::bail!(
                    "MASKGATE_{}_BURST and MASKGATE_{}_REFILL_SECS must both be positive",
                    name,
                    name
                );
            }
        }

        let ttl_days: u64 = parse_or(&lookup, "MASKGATE_CREDENTIAL_TTL_DAYS", 30)?;
        if ttl_days == 0 {
            anyhow::bail!("MASKGATE_CREDENTIAL_TTL_DAYS must be positive");
        }
        let credential_ttl = ttl_days
            .checked_mul(24 * 60 * 60)
            .map(Duration::from_secs)
            .context("MASKGATE_CREDENTIAL_TTL_DAYS is too large")?;

        let store_timeout_ms: u64 = parse_or(&lookup, "MASKGATE_STORE_TIMEOUT_MS", 2000)?;
        let request_timeout_secs: u64 = parse_or(&lookup, "MASKGATE_REQUEST_TIMEOUT_SECS", 10)?;
        if store_timeout_ms == 0 || request_timeout_secs == 0 {
            anyhow::bail!(
                "MASKGATE_STORE_TIMEOUT_MS and MASKGATE_REQUEST_TIMEOUT_SECS must both be positive"
            );
        }

        Ok(Config {
            port: parse_or(&lookup, "MASKGATE_PORT", defaults.port)?,
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            admin_token,
            ip_limit,
            key_limit,
            credential_ttl,
            store_timeout: Duration::from_millis(store_timeout_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_body_bytes: parse_or(&lookup, "MASKGATE_MAX_BODY_BYTES", defaults.max_body_bytes)?,
        })
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", name, raw)),
        None => Ok(default),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_lookup(|name| std::env::var(name).ok())
}
