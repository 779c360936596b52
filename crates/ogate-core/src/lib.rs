//! Request-path core: auth, orchestration, upstream IO, streaming, and the
//! collaborator contracts consumed along the way.

pub mod auth;
pub mod context;
pub mod encoding;
pub mod error;
pub mod handler;
pub mod headers;
pub mod health;
pub mod price;
pub mod pump;
pub mod retry;
pub mod spend;
pub mod state;
pub mod upstream;
pub mod vertex_token;

pub use auth::{AuthIdentity, authenticate};
pub use error::{ErrorClass, GatewayError, envelope_body, envelope_response, error_type};
pub use health::{BasicHealthRenderer, HealthRenderer};
pub use price::{ModelPrice, PriceRegistry, StaticPrices};
pub use pump::{BufferPool, PumpOptions, PumpOutcome, UsageSniffer, pump};
pub use spend::{
    MemorySpendSink, NoopSpendSink, SpendLogEntry, SpendLogError, SpendSink, SpendStatus,
    TokenIdentity, ValidateError,
};
pub use state::{AppState, Collaborators, router};
pub use upstream::{HttpUpstream, UpstreamConfig, UpstreamError};
pub use vertex_token::{StaticTokenProvider, TokenError, TokenProvider};
