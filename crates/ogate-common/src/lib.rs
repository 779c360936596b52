pub mod config;
pub mod headers;
pub mod usage;

pub use config::{
    ConfigError, CredentialConfig, CredentialKind, GatewayConfig, UNLIMITED, normalize_limit,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use usage::TokenUsage;
