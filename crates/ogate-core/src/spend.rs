use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ogate_common::TokenUsage;
use time::OffsetDateTime;

/// Identity attached to a request after token validation.
#[derive(Debug, Clone)]
pub struct TokenIdentity {
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token blocked")]
    Blocked,
    #[error("budget exceeded")]
    BudgetExceeded,
    #[error("token validation failed: {0}")]
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpendLogError {
    #[error("spend queue full")]
    QueueFull,
}

/// One spend-log record. The core produces it; persistence lives behind
/// the sink.
#[derive(Debug, Clone)]
pub struct SpendLogEntry {
    pub request_id: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub model: String,
    pub credential: String,
    pub status: SpendStatus,
    pub http_status: u16,
    pub usage: TokenUsage,
    pub cost: f64,
    pub session_id: Option<String>,
    pub end_user: Option<String>,
    pub token_hash: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendStatus {
    Success,
    Failure,
}

impl SpendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpendStatus::Success => "success",
            SpendStatus::Failure => "failure",
        }
    }
}

/// Spend/accounting collaborator. `log_spend` must not block the request
/// path; an overflowing queue reports `QueueFull` and the entry is dropped.
#[async_trait]
pub trait SpendSink: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn is_healthy(&self) -> bool;
    async fn validate_token(&self, token: &str) -> Result<TokenIdentity, ValidateError>;
    fn log_spend(&self, entry: SpendLogEntry) -> Result<(), SpendLogError>;
}

/// Disabled sink: only the master key admits, entries vanish.
#[derive(Debug, Default)]
pub struct NoopSpendSink;

#[async_trait]
impl SpendSink for NoopSpendSink {
    fn is_enabled(&self) -> bool {
        false
    }

    fn is_healthy(&self) -> bool {
        false
    }

    async fn validate_token(&self, _token: &str) -> Result<TokenIdentity, ValidateError> {
        Err(ValidateError::Invalid)
    }

    fn log_spend(&self, _entry: SpendLogEntry) -> Result<(), SpendLogError> {
        Ok(())
    }
}

/// In-memory sink with a bounded queue. Used by tests and as the default
/// when no external sink is wired up.
#[derive(Debug)]
pub struct MemorySpendSink {
    tokens: HashMap<String, TokenIdentity>,
    entries: Mutex<Vec<SpendLogEntry>>,
    capacity: usize,
}

impl MemorySpendSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: HashMap::new(),
            entries: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(
            token.into(),
            TokenIdentity {
                user_id: user_id.into(),
            },
        );
        self
    }

    pub fn entries(&self) -> Vec<SpendLogEntry> {
        self.entries.lock().expect("spend lock").clone()
    }
}

#[async_trait]
impl SpendSink for MemorySpendSink {
    fn is_enabled(&self) -> bool {
        true
    }

    fn is_healthy(&self) -> bool {
        true
    }

    async fn validate_token(&self, token: &str) -> Result<TokenIdentity, ValidateError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(ValidateError::Invalid)
    }

    fn log_spend(&self, entry: SpendLogEntry) -> Result<(), SpendLogError> {
        let mut entries = self.entries.lock().expect("spend lock");
        if entries.len() >= self.capacity {
            return Err(SpendLogError::QueueFull);
        }
        entries.push(entry);
        Ok(())
    }
}
