use std::collections::HashMap;

use ogate_common::{UNLIMITED, normalize_limit};

use crate::rate::RateLimiter;
use crate::registry::ModelRegistry;
use crate::snapshot::HealthSnapshot;

/// Fold a peer gateway's `/health` document into our limiter's view of the
/// gateway credential.
///
/// Aggregation rules: a credential-level limit is the max positive value
/// across the peer's credentials (requests funnel through one peer
/// credential at a time); a model-level limit is summed across the peer
/// credentials that serve it; current usage is summed in both cases. A peer
/// limit of 0 means unlimited and poisons the aggregate to unlimited.
pub fn apply_peer_health(
    gateway_cred: &str,
    snapshot: &HealthSnapshot,
    limiter: &RateLimiter,
    registry: &ModelRegistry,
) {
    let mut cred_rpm = UNLIMITED;
    let mut cred_tpm = UNLIMITED;
    let mut cred_rpm_used = 0i64;
    let mut cred_tpm_used = 0i64;
    let mut any_unlimited_rpm = false;
    let mut any_unlimited_tpm = false;

    struct ModelAgg {
        rpm: i64,
        tpm: i64,
        rpm_unlimited: bool,
        tpm_unlimited: bool,
        rpm_used: i64,
        tpm_used: i64,
    }
    let mut models: HashMap<String, ModelAgg> = HashMap::new();

    for peer_cred in &snapshot.credentials {
        let rpm = normalize_limit(peer_cred.rpm_limit);
        let tpm = normalize_limit(peer_cred.tpm_limit);
        if rpm == UNLIMITED {
            any_unlimited_rpm = true;
        } else if rpm > cred_rpm {
            cred_rpm = rpm;
        }
        if tpm == UNLIMITED {
            any_unlimited_tpm = true;
        } else if tpm > cred_tpm {
            cred_tpm = tpm;
        }
        cred_rpm_used += peer_cred.rpm_used.max(0);
        cred_tpm_used += peer_cred.tpm_used.max(0);

        for model in &peer_cred.models {
            let agg = models.entry(model.model.clone()).or_insert(ModelAgg {
                rpm: 0,
                tpm: 0,
                rpm_unlimited: false,
                tpm_unlimited: false,
                rpm_used: 0,
                tpm_used: 0,
            });
            match normalize_limit(model.rpm_limit) {
                UNLIMITED => agg.rpm_unlimited = true,
                rpm => agg.rpm += rpm,
            }
            match normalize_limit(model.tpm_limit) {
                UNLIMITED => agg.tpm_unlimited = true,
                tpm => agg.tpm += tpm,
            }
            agg.rpm_used += model.rpm_used.max(0);
            agg.tpm_used += model.tpm_used.max(0);
        }
    }

    if any_unlimited_rpm {
        cred_rpm = UNLIMITED;
    }
    if any_unlimited_tpm {
        cred_tpm = UNLIMITED;
    }

    limiter.add_credential_with_tpm(gateway_cred, cred_rpm, cred_tpm);
    limiter.set_current_usage(gateway_cred, cred_rpm_used, cred_tpm_used);

    for (model, agg) in models {
        let rpm = if agg.rpm_unlimited { UNLIMITED } else { agg.rpm };
        let tpm = if agg.tpm_unlimited { UNLIMITED } else { agg.tpm };
        limiter.add_model_with_tpm(gateway_cred, &model, rpm, tpm);
        limiter.set_model_current_usage(gateway_cred, &model, agg.rpm_used, agg.tpm_used);
        registry.add_model(gateway_cred, &model);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::snapshot::{CredentialHealth, ModelHealth};

    use super::*;

    fn peer_cred(
        name: &str,
        rpm_limit: i64,
        rpm_used: i64,
        models: Vec<ModelHealth>,
    ) -> CredentialHealth {
        CredentialHealth {
            name: name.to_string(),
            kind: "openai".to_string(),
            available: true,
            rpm_limit,
            rpm_used,
            tpm_limit: UNLIMITED,
            tpm_used: 0,
            models,
        }
    }

    fn model(name: &str, rpm_limit: i64, rpm_used: i64) -> ModelHealth {
        ModelHealth {
            model: name.to_string(),
            rpm_limit,
            rpm_used,
            tpm_limit: UNLIMITED,
            tpm_used: 0,
            banned: false,
        }
    }

    #[test]
    fn credential_limits_take_max_and_usage_sums() {
        let limiter = RateLimiter::new(Arc::new(ManualClock::new()));
        let registry = ModelRegistry::from_config(&HashMap::new(), &[]);
        let snapshot = HealthSnapshot {
            credentials: vec![
                peer_cred("x", 60, 10, vec![]),
                peer_cred("y", 100, 5, vec![]),
            ],
        };
        apply_peer_health("gw", &snapshot, &limiter, &registry);
        let row = limiter
            .snapshot()
            .into_iter()
            .find(|row| row.credential == "gw" && row.model.is_none())
            .unwrap();
        assert_eq!(row.rpm_limit, 100);
        assert_eq!(row.rpm_used, 15);
    }

    #[test]
    fn model_limits_sum_across_peer_credentials() {
        let limiter = RateLimiter::new(Arc::new(ManualClock::new()));
        let registry = ModelRegistry::from_config(&HashMap::new(), &[]);
        let snapshot = HealthSnapshot {
            credentials: vec![
                peer_cred("x", 60, 0, vec![model("gpt-4o", 30, 2)]),
                peer_cred("y", 60, 0, vec![model("gpt-4o", 20, 3)]),
            ],
        };
        apply_peer_health("gw", &snapshot, &limiter, &registry);
        let row = limiter
            .snapshot()
            .into_iter()
            .find(|row| row.model.as_deref() == Some("gpt-4o"))
            .unwrap();
        assert_eq!(row.rpm_limit, 50);
        assert_eq!(row.rpm_used, 5);
        assert!(registry.supports("gw", "gpt-4o"));
    }

    #[test]
    fn zero_peer_limit_is_stored_as_unlimited() {
        let limiter = RateLimiter::new(Arc::new(ManualClock::new()));
        let registry = ModelRegistry::from_config(&HashMap::new(), &[]);
        let snapshot = HealthSnapshot {
            credentials: vec![peer_cred("x", 0, 0, vec![model("m", 0, 0)])],
        };
        apply_peer_health("gw", &snapshot, &limiter, &registry);
        for row in limiter.snapshot() {
            assert_eq!(row.rpm_limit, UNLIMITED);
        }
        for _ in 0..50 {
            assert!(limiter.try_admit("gw", "m"));
        }
    }
}
