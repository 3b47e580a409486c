//! Credential lifecycle on top of the shared store.
//!
//! State machine per credential: `nonexistent → active → revoked`, with
//! TTL expiry returning any state to `nonexistent`. Rotation spawns a new
//! active credential while the old one moves to `revoked`, in one atomic
//! store operation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use super::{StateStore, StoreError};
use crate::models::credential::{masked, CredentialDescription, CredentialRecord, Plan};

/// Random bytes per credential (128 bits, 32 hex chars).
const CREDENTIAL_BYTES: usize = 16;

pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CredentialError {
    /// Unknown, expired, or (where activity is required) revoked.
    #[error("credential not found")]
    NotFound,

    #[error("corrupt credential record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn record_key(token: &str) -> String {
    format!("credential:{}", token)
}

pub fn usage_key(token: &str) -> String {
    format!("credential:{}:usage", token)
}

/// Whether `token` has the shape of an issued credential: exactly
/// `2 * CREDENTIAL_BYTES` lowercase hex characters. Anything else cannot
/// name a credential record and never reaches the store.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == CREDENTIAL_BYTES * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Fresh opaque credential: 128 bits from the OS RNG, lowercase hex.
pub fn generate_token() -> String {
    let mut bytes = [0u8; CREDENTIAL_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a new active credential on `plan`.
    ///
    /// Token collisions are not re-checked; at 128 bits they are not a
    /// practical concern.
    pub async fn issue(&self, plan: Plan) -> Result<String, CredentialError> {
        let token = generate_token();
        let record = CredentialRecord::new(plan, Utc::now());
        self.store
            .hash_set_with_ttl(&record_key(&token), &record.to_fields(), self.ttl)
            .await?;
        tracing::info!(credential = %masked(&token), plan = %plan, "credential issued");
        Ok(token)
    }

    /// Reads a record regardless of its `active` flag.
    pub async fn lookup(&self, token: &str) -> Result<CredentialRecord, CredentialError> {
        if !is_well_formed(token) {
            return Err(CredentialError::NotFound);
        }
        let fields = self.store.hash_get_all(&record_key(token)).await?;
        CredentialRecord::from_fields(&fields)
            .map_err(CredentialError::Corrupt)?
            .ok_or(CredentialError::NotFound)
    }

    /// Returns the record only if it exists and is active.
    pub async fn validate(&self, token: &str) -> Result<CredentialRecord, CredentialError> {
        let record = self.lookup(token).await?;
        if !record.active {
            return Err(CredentialError::NotFound);
        }
        Ok(record)
    }

    /// Replaces `old` with a fresh credential carrying the same metadata.
    ///
    /// The copy to the new token and the disabling of the old one happen
    /// in a single store operation. Of several concurrent rotations of the
    /// same credential exactly one succeeds; the others see `NotFound`.
    pub async fn rotate(&self, old: &str) -> Result<String, CredentialError> {
        self.validate(old).await?;

        let new = generate_token();
        let rotated = self
            .store
            .rotate_credential(&record_key(old), &record_key(&new), self.ttl)
            .await?;
        if !rotated {
            tracing::warn!(credential = %masked(old), "rotation lost to a concurrent change");
            return Err(CredentialError::NotFound);
        }

        tracing::info!(old = %masked(old), new = %masked(&new), "credential rotated");
        Ok(new)
    }

    /// Disables a credential. Repeating it on a revoked credential is a
    /// no-op success; a credential that no longer exists is `NotFound`.
    pub async fn revoke(&self, token: &str) -> Result<(), CredentialError> {
        if !is_well_formed(token) {
            return Err(CredentialError::NotFound);
        }
        if !self.store.revoke_credential(&record_key(token)).await? {
            return Err(CredentialError::NotFound);
        }
        tracing::info!(credential = %masked(token), "credential revoked");
        Ok(())
    }

    /// Bumps the usage counter. Telemetry only, not read for admission.
    pub async fn record_usage(&self, token: &str) -> Result<i64, CredentialError> {
        let count = self
            .store
            .increment_usage(&usage_key(token), &record_key(token))
            .await?;
        Ok(count)
    }

    pub async fn usage_count(&self, token: &str) -> Result<i64, CredentialError> {
        Ok(self.store.counter(&usage_key(token)).await?)
    }

    /// Full metadata, usage count and remaining TTL, active or not.
    pub async fn describe(&self, token: &str) -> Result<CredentialDescription, CredentialError> {
        let record = self.lookup(token).await?;
        let usage_count = self.usage_count(token).await?;
        let expires_in = self
            .store
            .ttl(&record_key(token))
            .await?
            .map(|ttl| ttl.as_secs());

        Ok(CredentialDescription {
            record,
            usage_count,
            expires_in,
        })
    }
}
