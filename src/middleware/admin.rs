use subtle::ConstantTimeEq;

use crate::models::credential::Plan;

/// Decides which plan a new credential gets.
///
/// Anyone may obtain a `free` credential. A paid plan is granted only when
/// the caller presents the configured admin secret; otherwise the request
/// for elevation is ignored and the credential is issued as `free`.
#[derive(Debug, Clone, Default)]
pub struct PlanPolicy {
    admin_secret: Option<String>,
}

impl PlanPolicy {
    pub fn new(admin_secret: Option<String>) -> Self {
        Self { admin_secret }
    }

    pub fn is_admin(&self, presented: Option<&str>) -> bool {
        match (&self.admin_secret, presented) {
            (Some(secret), Some(given)) => secret.as_bytes().ct_eq(given.as_bytes()).into(),
            _ => false,
        }
    }

    pub fn grant(&self, requested: Option<Plan>, presented: Option<&str>) -> Plan {
        match requested {
            Some(plan) if plan.is_paid() => {
                if self.is_admin(presented) {
                    plan
                } else {
                    tracing::warn!(requested = %plan, "plan elevation without a valid admin token, issuing free");
                    Plan::Free
                }
            }
            _ => Plan::Free,
        }
    }
}
