use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ogate_common::CredentialConfig;

use crate::breaker::CircuitBreaker;
use crate::rate::RateLimiter;
use crate::registry::ModelRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    /// Healthy credentials exist for the model but all are rate-limited.
    #[error("rate limit exceeded")]
    RateLimited,
    /// No credential supports the model or all are circuit-broken.
    #[error("no credentials available")]
    NoAvailable,
}

/// Round-robin credential selector. Eligibility is model support, circuit
/// state, and rate admission, in that order; admission on the limiter is
/// the side effect that claims the request slot.
pub struct Balancer {
    credentials: Vec<Arc<CredentialConfig>>,
    cursor: AtomicUsize,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<ModelRegistry>,
}

impl Balancer {
    pub fn new(
        credentials: Vec<Arc<CredentialConfig>>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            credentials,
            cursor: AtomicUsize::new(0),
            limiter,
            breaker,
            registry,
        }
    }

    pub fn credentials(&self) -> &[Arc<CredentialConfig>] {
        &self.credentials
    }

    pub fn next_for(&self, model: &str) -> Result<Arc<CredentialConfig>, BalanceError> {
        self.select(model, false)
    }

    pub fn next_fallback_for(&self, model: &str) -> Result<Arc<CredentialConfig>, BalanceError> {
        self.select(model, true)
    }

    fn select(
        &self,
        model: &str,
        want_fallback: bool,
    ) -> Result<Arc<CredentialConfig>, BalanceError> {
        if self.credentials.is_empty() {
            return Err(BalanceError::NoAvailable);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut saw_healthy = false;
        for offset in 0..self.credentials.len() {
            let cred = &self.credentials[(start + offset) % self.credentials.len()];
            if cred.is_fallback != want_fallback {
                continue;
            }
            if !self.registry.supports(&cred.name, model) {
                continue;
            }
            if self.breaker.is_banned_credential(&cred.name)
                || self.breaker.is_banned(&cred.name, model)
            {
                continue;
            }
            saw_healthy = true;
            if self.limiter.try_admit(&cred.name, model) {
                return Ok(cred.clone());
            }
        }
        if saw_healthy {
            Err(BalanceError::RateLimited)
        } else {
            Err(BalanceError::NoAvailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use ogate_common::{CredentialKind, UNLIMITED};

    use crate::breaker::BreakerConfig;
    use crate::clock::ManualClock;

    use super::*;

    fn cred(name: &str, fallback: bool) -> Arc<CredentialConfig> {
        Arc::new(CredentialConfig {
            name: name.to_string(),
            kind: CredentialKind::OpenAI,
            secret: "sk".to_string(),
            base_url: "https://example.com".to_string(),
            rpm_limit: UNLIMITED,
            tpm_limit: UNLIMITED,
            is_fallback: fallback,
            models: Vec::new(),
            auth_file: None,
            auth_json: None,
        })
    }

    fn harness(
        creds: Vec<Arc<CredentialConfig>>,
    ) -> (Arc<ManualClock>, Arc<RateLimiter>, Arc<CircuitBreaker>, Balancer) {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        for cred in &creds {
            limiter.add_credential_with_tpm(&cred.name, cred.rpm_limit, cred.tpm_limit);
        }
        let breaker = Arc::new(CircuitBreaker::with_clock(
            BreakerConfig {
                max_consecutive_failures: 3,
                ban_ttl: Duration::from_secs(60),
                tracked_codes: [500].into_iter().collect(),
            },
            clock.clone(),
        ));
        let registry = Arc::new(ModelRegistry::from_config(
            &HashMap::new(),
            &creds.iter().map(|c| (**c).clone()).collect::<Vec<_>>(),
        ));
        let balancer = Balancer::new(creds, limiter.clone(), breaker.clone(), registry);
        (clock, limiter, breaker, balancer)
    }

    #[test]
    fn round_robin_rotates_over_primaries() {
        let (_, _, _, balancer) = harness(vec![cred("a", false), cred("b", false)]);
        let first = balancer.next_for("m").unwrap().name.clone();
        let second = balancer.next_for("m").unwrap().name.clone();
        assert_ne!(first, second);
    }

    #[test]
    fn fallback_selection_ignores_primaries() {
        let (_, _, _, balancer) = harness(vec![cred("p", false), cred("f", true)]);
        assert_eq!(balancer.next_fallback_for("m").unwrap().name, "f");
        assert_eq!(balancer.next_for("m").unwrap().name, "p");
    }

    #[test]
    fn rate_limited_pool_reports_rate_limited() {
        let creds = vec![cred("a", false)];
        let (_, limiter, _, balancer) = harness(creds);
        limiter.add_credential_with_tpm("a", 1, UNLIMITED);
        assert!(balancer.next_for("m").is_ok());
        assert_eq!(balancer.next_for("m"), Err(BalanceError::RateLimited));
    }

    #[test]
    fn banned_credential_is_skipped_until_ttl_expires() {
        let (clock, _, breaker, balancer) = harness(vec![cred("a", false)]);
        for _ in 0..3 {
            breaker.record("a", "m", 500);
        }
        assert_eq!(balancer.next_for("m"), Err(BalanceError::NoAvailable));
        clock.advance(Duration::from_secs(60));
        assert_eq!(balancer.next_for("m").unwrap().name, "a");
    }

    #[test]
    fn unsupported_model_reports_no_available() {
        let mut narrow = (*cred("a", false)).clone();
        narrow.models = vec!["gpt-4o".to_string()];
        let (_, _, _, balancer) = harness(vec![Arc::new(narrow)]);
        assert_eq!(
            balancer.next_for("claude-3-opus"),
            Err(BalanceError::NoAvailable)
        );
        assert!(balancer.next_for("gpt-4o").is_ok());
    }
}
