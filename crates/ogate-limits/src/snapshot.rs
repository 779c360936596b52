use serde::{Deserialize, Serialize};

use ogate_common::UNLIMITED;

use crate::breaker::CircuitBreaker;
use crate::rate::{RateLimiter, RateRow};

/// The `/health` document. Serialized for our own endpoint and parsed from
/// peer gateways by the mirror, so it derives both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub credentials: Vec<CredentialHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialHealth {
    pub name: String,
    pub kind: String,
    pub available: bool,
    #[serde(default = "unlimited")]
    pub rpm_limit: i64,
    #[serde(default)]
    pub rpm_used: i64,
    #[serde(default = "unlimited")]
    pub tpm_limit: i64,
    #[serde(default)]
    pub tpm_used: i64,
    #[serde(default)]
    pub models: Vec<ModelHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model: String,
    #[serde(default = "unlimited")]
    pub rpm_limit: i64,
    #[serde(default)]
    pub rpm_used: i64,
    #[serde(default = "unlimited")]
    pub tpm_limit: i64,
    #[serde(default)]
    pub tpm_used: i64,
    #[serde(default)]
    pub banned: bool,
}

fn unlimited() -> i64 {
    UNLIMITED
}

/// Assemble the health document from limiter and breaker state for the
/// given credential list (name, kind) pairs.
pub fn build_snapshot(
    credentials: &[(String, String)],
    limiter: &RateLimiter,
    breaker: &CircuitBreaker,
) -> HealthSnapshot {
    let rows = limiter.snapshot();
    let mut snapshot = HealthSnapshot::default();
    for (name, kind) in credentials {
        let cred_row = rows
            .iter()
            .find(|row| &row.credential == name && row.model.is_none());
        let models = rows
            .iter()
            .filter(|row| &row.credential == name && row.model.is_some())
            .map(|row| model_health(row, breaker))
            .collect();
        let (rpm_limit, rpm_used, tpm_limit, tpm_used) = match cred_row {
            Some(row) => (row.rpm_limit, row.rpm_used, row.tpm_limit, row.tpm_used),
            None => (UNLIMITED, 0, UNLIMITED, 0),
        };
        snapshot.credentials.push(CredentialHealth {
            name: name.clone(),
            kind: kind.clone(),
            available: !breaker.is_banned_credential(name),
            rpm_limit,
            rpm_used,
            tpm_limit,
            tpm_used,
            models,
        });
    }
    snapshot
}

fn model_health(row: &RateRow, breaker: &CircuitBreaker) -> ModelHealth {
    let model = row.model.clone().unwrap_or_default();
    ModelHealth {
        banned: breaker.is_banned(&row.credential, &model),
        model,
        rpm_limit: row.rpm_limit,
        rpm_used: row.rpm_used,
        tpm_limit: row.tpm_limit,
        tpm_used: row.tpm_used,
    }
}
