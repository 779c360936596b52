use serde::{Deserialize, Serialize};

/// Sentinel for "no limit" on RPM/TPM counters.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("credential `{0}` is missing a base_url")]
    MissingBaseUrl(String),
    #[error("duplicate credential name `{0}`")]
    DuplicateCredential(String),
    #[error("vertex credential `{0}` needs auth_file or auth_json")]
    MissingVertexAuth(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    OpenAI,
    Vertex,
    Anthropic,
    Gateway,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::OpenAI => "openai",
            CredentialKind::Vertex => "vertex",
            CredentialKind::Anthropic => "anthropic",
            CredentialKind::Gateway => "gateway",
        }
    }

    /// Passthrough kinds speak the OpenAI wire format natively.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, CredentialKind::OpenAI | CredentialKind::Gateway)
    }
}

/// One upstream identity. Built from config at startup, read-only afterwards.
///
/// The limiter keeps its own mutable view of `rpm_limit`/`tpm_limit` for
/// gateway credentials so the peer mirror can overwrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub name: String,
    pub kind: CredentialKind,
    #[serde(default)]
    pub secret: String,
    pub base_url: String,
    #[serde(default = "default_limit")]
    pub rpm_limit: i64,
    #[serde(default = "default_limit")]
    pub tpm_limit: i64,
    #[serde(default)]
    pub is_fallback: bool,
    /// Models this credential serves. Empty means "all models".
    #[serde(default)]
    pub models: Vec<String>,
    /// Vertex service-account key file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<String>,
    /// Vertex service-account key inline JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_json: Option<String>,
}

fn default_limit() -> i64 {
    UNLIMITED
}

impl CredentialConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl(self.name.clone()));
        }
        if self.kind == CredentialKind::Vertex
            && self.auth_file.is_none()
            && self.auth_json.is_none()
        {
            return Err(ConfigError::MissingVertexAuth(self.name.clone()));
        }
        Ok(())
    }
}

/// Final, merged gateway configuration used by the running process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub master_key: String,
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stream_write_timeout_secs")]
    pub stream_write_timeout_secs: u64,
    #[serde(default = "default_breaker_failures")]
    pub breaker_max_consecutive_failures: u32,
    #[serde(default = "default_breaker_ban_secs")]
    pub breaker_ban_secs: u64,
    #[serde(default = "default_breaker_codes")]
    pub breaker_tracked_codes: Vec<u16>,
    /// Model alias table: alias -> upstream model id.
    #[serde(default)]
    pub model_aliases: std::collections::HashMap<String, String>,
    pub credentials: Vec<CredentialConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8701
}

fn default_max_body_mb() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_stream_write_timeout_secs() -> u64 {
    60
}

fn default_breaker_failures() -> u32 {
    3
}

fn default_breaker_ban_secs() -> u64 {
    300
}

fn default_breaker_codes() -> Vec<u16> {
    vec![401, 403, 500]
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for cred in &self.credentials {
            cred.validate()?;
            if !seen.insert(cred.name.as_str()) {
                return Err(ConfigError::DuplicateCredential(cred.name.clone()));
            }
        }
        Ok(())
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb * 1024 * 1024
    }
}

/// Normalize a wire limit: peers report 0 for "unlimited".
pub fn normalize_limit(limit: i64) -> i64 {
    if limit <= 0 { UNLIMITED } else { limit }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_limits_normalize_to_unlimited() {
        assert_eq!(normalize_limit(0), UNLIMITED);
        assert_eq!(normalize_limit(-5), UNLIMITED);
        assert_eq!(normalize_limit(60), 60);
    }

    #[test]
    fn duplicate_credential_names_rejected() {
        let cred = CredentialConfig {
            name: "a".to_string(),
            kind: CredentialKind::OpenAI,
            secret: "sk".to_string(),
            base_url: "https://api.openai.com".to_string(),
            rpm_limit: UNLIMITED,
            tpm_limit: UNLIMITED,
            is_fallback: false,
            models: Vec::new(),
            auth_file: None,
            auth_json: None,
        };
        let config = GatewayConfig {
            host: default_host(),
            port: default_port(),
            master_key: "sk-master".to_string(),
            max_body_mb: 10,
            request_timeout_secs: 600,
            connect_timeout_secs: 5,
            stream_write_timeout_secs: 60,
            breaker_max_consecutive_failures: 3,
            breaker_ban_secs: 300,
            breaker_tracked_codes: default_breaker_codes(),
            model_aliases: Default::default(),
            credentials: vec![cred.clone(), cred],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateCredential(_))
        ));
    }

    #[test]
    fn vertex_requires_auth_material() {
        let cred = CredentialConfig {
            name: "v".to_string(),
            kind: CredentialKind::Vertex,
            secret: String::new(),
            base_url: "https://us-central1-aiplatform.googleapis.com".to_string(),
            rpm_limit: UNLIMITED,
            tpm_limit: UNLIMITED,
            is_fallback: false,
            models: Vec::new(),
            auth_file: None,
            auth_json: None,
        };
        assert!(matches!(
            cred.validate(),
            Err(ConfigError::MissingVertexAuth(_))
        ));
    }
}
