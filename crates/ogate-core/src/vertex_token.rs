use std::collections::HashMap;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no oauth token available for credential `{0}`")]
    Unavailable(String),
    #[error("token acquisition failed: {0}")]
    Acquire(String),
}

/// OAuth bearer-token source for Vertex credentials. Real implementations
/// exchange the service-account key (file or inline JSON) for an access
/// token and cache it until expiry; the core only consumes the result.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(
        &self,
        cred_name: &str,
        auth_file: Option<&str>,
        auth_json: Option<&str>,
    ) -> Result<String, TokenError>;
}

/// Fixed token table for tests and static deployments.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(
        &self,
        cred_name: &str,
        _auth_file: Option<&str>,
        _auth_json: Option<&str>,
    ) -> Result<String, TokenError> {
        self.tokens
            .get(cred_name)
            .cloned()
            .ok_or_else(|| TokenError::Unavailable(cred_name.to_string()))
    }
}
