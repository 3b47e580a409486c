//! Request admission.
//!
//! Every API request first passes the IP-scoped bucket. Credential-gated
//! routes then go through [`require_credential`]: header extraction,
//! validation, the credential-scoped bucket and usage accounting, in that
//! order. The first failing step answers the request; nothing after it
//! runs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use super::rate_limit::{credential_scope, ip_scope, BucketLimit};
use crate::errors::AppError;
use crate::models::credential::{masked, CredentialRecord};
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// The validated caller, inserted into request extensions by
/// [`require_credential`].
#[derive(Debug, Clone)]
pub struct Caller {
    pub token: String,
    pub record: CredentialRecord,
}

/// Non-empty, trimmed value of a header.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn api_key(headers: &HeaderMap) -> Option<&str> {
    header_value(headers, API_KEY_HEADER)
}

/// Takes one token from `scope`, recording the decision.
async fn consume(
    state: &AppState,
    label: &'static str,
    scope: &str,
    limit: BucketLimit,
) -> Result<(), AppError> {
    match state.limiter.allow(scope, limit, Utc::now().timestamp()).await {
        Ok(true) => {
            state.metrics.rate_limit(label, "allowed");
            Ok(())
        }
        Ok(false) => {
            state.metrics.rate_limit(label, "denied");
            Err(AppError::RateLimited {
                retry_after_secs: limit.refill_interval_secs,
            })
        }
        Err(e) => {
            // fail closed: an unreachable store never admits
            state.metrics.rate_limit(label, "error");
            Err(AppError::Storage(e))
        }
    }
}

/// Middleware: IP-scoped token bucket, applied to every API route.
///
/// The client is the TCP peer. A server started without connect info
/// fails the extractor, which answers 500.
pub async fn ip_rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    consume(&state, "ip", &ip_scope(addr.ip()), state.config.ip_limit).await?;
    Ok(next.run(req).await)
}

/// Middleware: admits only callers presenting an active credential with
/// budget left in their own bucket.
pub async fn require_credential(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = api_key(req.headers())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized("Missing API key"))?;

    let record = state.credentials.validate(&token).await?;

    consume(
        &state,
        "credential",
        &credential_scope(&token),
        state.config.key_limit,
    )
    .await?;

    if let Err(e) = state.credentials.record_usage(&token).await {
        tracing::warn!(credential = %masked(&token), "failed to record usage: {}", e);
    }

    req.extensions_mut().insert(Caller { token, record });
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_api_key_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("  abc  "));
        assert_eq!(api_key(&headers), Some("abc"));
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(api_key(&headers), None);
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("   "));
        assert_eq!(api_key(&headers), None);
    }
}
