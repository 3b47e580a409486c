use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Plan tier attached to a credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Ultra,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Ultra => "ultra",
        }
    }

    /// Paid tiers unlock bulk masking.
    pub fn is_paid(&self) -> bool {
        matches!(self, Plan::Pro | Plan::Ultra)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            "ultra" => Ok(Plan::Ultra),
            other => Err(format!("unknown plan '{}'", other)),
        }
    }
}

/// Credential metadata as stored in the `credential:{token}` hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRecord {
    pub active: bool,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(plan: Plan, created_at: DateTime<Utc>) -> Self {
        Self {
            active: true,
            plan,
            created_at,
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("active", self.active.to_string()),
            ("plan", self.plan.to_string()),
            (
                "created_at",
                self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ]
    }

    /// Rebuilds a record from its hash fields.
    ///
    /// `Ok(None)` means the hash is absent (empty). Anything other than
    /// `"true"` in `active` reads as revoked.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Option<Self>, String> {
        if fields.is_empty() {
            return Ok(None);
        }
        let plan = fields
            .get("plan")
            .map(|p| p.parse::<Plan>())
            .transpose()?
            .unwrap_or_default();
        let created_at = fields
            .get("created_at")
            .ok_or_else(|| "missing created_at".to_string())
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| format!("bad created_at '{}': {}", raw, e))
            })?;

        Ok(Some(Self {
            active: fields.get("active").map(String::as_str) == Some("true"),
            plan,
            created_at,
        }))
    }
}

/// Everything the owner of a credential may learn about it.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialDescription {
    pub record: CredentialRecord,
    pub usage_count: i64,
    /// Remaining time-to-live in seconds.
    pub expires_in: Option<u64>,
}

/// Shortens a credential for log lines: `abcd…wxyz`.
pub fn masked(token: &str) -> String {
    if token.len() > 8 && token.is_ascii() {
        format!("{}…{}", &token[..4], &token[token.len() - 4..])
    } else {
        "****".to_string()
    }
}
