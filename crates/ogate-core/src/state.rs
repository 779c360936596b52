use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use ogate_common::{CredentialConfig, GatewayConfig};
use ogate_limits::{
    Balancer, BreakerConfig, CircuitBreaker, ModelRegistry, MonotonicClock, RateLimiter,
};

use crate::handler;
use crate::health::{BasicHealthRenderer, HealthRenderer};
use crate::price::{PriceRegistry, StaticPrices};
use crate::pump::BufferPool;
use crate::spend::{NoopSpendSink, SpendSink};
use crate::upstream::{HttpUpstream, UpstreamConfig};
use crate::vertex_token::{StaticTokenProvider, TokenProvider};

/// Everything a request handler needs, shared behind one Arc.
pub struct AppState {
    pub config: GatewayConfig,
    pub credentials: Vec<Arc<CredentialConfig>>,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub registry: Arc<ModelRegistry>,
    pub balancer: Balancer,
    pub upstream: HttpUpstream,
    pub pool: Arc<BufferPool>,
    pub spend: Arc<dyn SpendSink>,
    pub prices: Arc<dyn PriceRegistry>,
    pub tokens: Arc<dyn TokenProvider>,
    pub renderer: Arc<dyn HealthRenderer>,
}

/// External collaborators. Defaults are inert implementations so the
/// gateway runs stand-alone.
pub struct Collaborators {
    pub spend: Arc<dyn SpendSink>,
    pub prices: Arc<dyn PriceRegistry>,
    pub tokens: Arc<dyn TokenProvider>,
    pub renderer: Arc<dyn HealthRenderer>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            spend: Arc::new(NoopSpendSink),
            prices: Arc::new(StaticPrices::default()),
            tokens: Arc::new(StaticTokenProvider::default()),
            renderer: Arc::new(BasicHealthRenderer),
        }
    }
}

impl AppState {
    pub fn build(
        config: GatewayConfig,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, anyhow::Error> {
        config.validate()?;

        let clock = Arc::new(MonotonicClock);
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        let credentials: Vec<Arc<CredentialConfig>> = config
            .credentials
            .iter()
            .cloned()
            .map(Arc::new)
            .collect();
        for cred in &credentials {
            limiter.add_credential_with_tpm(&cred.name, cred.rpm_limit, cred.tpm_limit);
        }

        let breaker = Arc::new(CircuitBreaker::with_clock(
            BreakerConfig {
                max_consecutive_failures: config.breaker_max_consecutive_failures,
                ban_ttl: Duration::from_secs(config.breaker_ban_secs),
                tracked_codes: config.breaker_tracked_codes.iter().copied().collect(),
            },
            clock,
        ));
        let registry = Arc::new(ModelRegistry::from_config(
            &config.model_aliases,
            &config.credentials,
        ));
        let balancer = Balancer::new(
            credentials.clone(),
            limiter.clone(),
            breaker.clone(),
            registry.clone(),
        );

        let upstream = HttpUpstream::new(UpstreamConfig {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(30),
            max_response_bytes: 64 * 1024 * 1024,
        })?;

        Ok(Arc::new(Self {
            config,
            credentials,
            limiter,
            breaker,
            registry,
            balancer,
            upstream,
            pool: Arc::new(BufferPool::default()),
            spend: collaborators.spend,
            prices: collaborators.prices,
            tokens: collaborators.tokens,
            renderer: collaborators.renderer,
        }))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handler::chat_completions))
        .route("/v1/completions", post(handler::completions))
        .route("/v1/images/generations", post(handler::images))
        .route("/v1/embeddings", post(handler::embeddings))
        .route("/v1/models", get(handler::models))
        .route("/health", get(handler::health))
        .route("/vhealth", get(handler::vhealth))
        .with_state(state)
}
