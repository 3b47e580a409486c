use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::middleware::gate::{api_key, header_value, ADMIN_TOKEN_HEADER};
use crate::models::credential::Plan;
use crate::store::credentials::CredentialError;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct IssueParams {
    pub plan: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyResponse {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    pub key: String,
    pub usage_count: i64,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    /// Seconds until the credential expires.
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub active: bool,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
    pub expires_in: Option<u64>,
}

/// Maps "no such credential" to a route-specific 401 message.
fn unauthorized_as(message: &'static str) -> impl Fn(CredentialError) -> AppError {
    move |err| match err {
        CredentialError::NotFound => AppError::Unauthorized(message),
        other => other.into(),
    }
}

// ── Handlers ─────────────────────────────────────────────────

/// GET|POST /generate-key[?plan=pro|ultra]: issue a new credential.
/// Paid plans require `X-Admin-Token`; without it the credential is free.
pub async fn issue_key(
    State(state): State<Arc<AppState>>,
    params: Result<Query<IssueParams>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<KeyResponse>, AppError> {
    let Query(params) = params.map_err(|rejection| {
        tracing::debug!("query rejection: {}", rejection.body_text());
        AppError::MalformedInput("Invalid query string".into())
    })?;
    let requested = params.plan.as_deref().and_then(|p| p.parse::<Plan>().ok());
    let plan = state
        .plans
        .grant(requested, header_value(&headers, ADMIN_TOKEN_HEADER));

    let issued = state.credentials.issue(plan).await;
    state.metrics.credential_op("issue", issued.is_ok());
    Ok(Json(KeyResponse { key: issued? }))
}

/// POST /rotate-key: swap the presented credential for a new one.
pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<KeyResponse>, AppError> {
    let old = api_key(&headers)
        .ok_or_else(|| AppError::MalformedInput("Old API key missing".into()))?;

    let rotated = state.credentials.rotate(old).await;
    state.metrics.credential_op("rotate", rotated.is_ok());
    let key = rotated.map_err(unauthorized_as("Old key invalid or revoked"))?;
    Ok(Json(KeyResponse { key }))
}

/// POST /revoke-key: permanently disable the presented credential.
pub async fn revoke_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError> {
    let key = api_key(&headers).ok_or_else(|| AppError::MalformedInput("Missing API key".into()))?;

    let revoked = state.credentials.revoke(key).await;
    state.metrics.credential_op("revoke", revoked.is_ok());
    revoked.map_err(unauthorized_as("Invalid API key"))?;

    Ok(Json(MessageResponse {
        message: "API key revoked successfully".into(),
    }))
}

/// GET /usage: usage count, plan and TTL of an active credential.
pub async fn usage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, AppError> {
    let key = api_key(&headers).ok_or(AppError::Unauthorized("Missing API key"))?;

    let desc = state
        .credentials
        .describe(key)
        .await
        .map_err(unauthorized_as("Invalid or revoked API key"))?;
    if !desc.record.active {
        return Err(AppError::Unauthorized("Invalid or revoked API key"));
    }

    Ok(Json(UsageResponse {
        key: key.to_string(),
        usage_count: desc.usage_count,
        plan: desc.record.plan,
        created_at: desc.record.created_at,
        active: desc.record.active,
        expires_in: desc.expires_in,
    }))
}

/// GET /metadata: stored record and TTL, including for revoked credentials.
pub async fn metadata(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MetadataResponse>, AppError> {
    let key = api_key(&headers).ok_or(AppError::Unauthorized("Missing API key"))?;

    let desc = state
        .credentials
        .describe(key)
        .await
        .map_err(unauthorized_as("Invalid API key"))?;

    Ok(Json(MetadataResponse {
        active: desc.record.active,
        plan: desc.record.plan,
        created_at: desc.record.created_at,
        expires_in: desc.expires_in,
    }))
}
