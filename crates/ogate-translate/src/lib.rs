//! Provider request/response codecs. A closed set of variants keyed by
//! credential kind: OpenAI and gateway upstreams are passthrough, Vertex
//! and Anthropic get full body and stream translation.

pub mod anthropic;
pub mod stream;
pub mod url;
pub mod usage;
pub mod vertex;

use bytes::Bytes;
use ogate_common::{CredentialConfig, CredentialKind, TokenUsage};

use crate::stream::StreamTranslator;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error("upstream body did not decode: {0}")]
    BadResponse(String),
    #[error("operation not supported by this provider: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chat,
    Completions,
    Embeddings,
    ImageGen,
}

/// Transform mode: the operation, whether the client asked to stream, and
/// the resolved model id the translator should target.
#[derive(Debug, Clone)]
pub struct TransformMode {
    pub op: Operation,
    pub streaming: bool,
    pub model: String,
}

/// Buffered response transform output. Translators that see provider usage
/// report it here so accounting does not re-parse the body.
#[derive(Debug)]
pub struct TransformedResponse {
    pub body: Bytes,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translator {
    OpenAI,
    Gateway,
    Vertex,
    Anthropic,
}

impl Translator {
    pub fn for_kind(kind: CredentialKind) -> Self {
        match kind {
            CredentialKind::OpenAI => Translator::OpenAI,
            CredentialKind::Gateway => Translator::Gateway,
            CredentialKind::Vertex => Translator::Vertex,
            CredentialKind::Anthropic => Translator::Anthropic,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Translator::OpenAI | Translator::Gateway)
    }

    pub fn build_url(
        &self,
        cred: &CredentialConfig,
        client_path: &str,
        query: Option<&str>,
        mode: &TransformMode,
    ) -> String {
        match self {
            Translator::OpenAI | Translator::Gateway => {
                url::passthrough_url(&cred.base_url, client_path, query)
            }
            Translator::Vertex => url::vertex_url(&cred.base_url, mode),
            Translator::Anthropic => url::anthropic_url(&cred.base_url),
        }
    }

    /// Rewrite the OpenAI-shape client body into the provider's shape.
    /// Passthrough variants hand the bytes back untouched.
    pub fn transform_request(
        &self,
        body: &Bytes,
        mode: &TransformMode,
    ) -> Result<Bytes, TransformError> {
        match self {
            Translator::OpenAI | Translator::Gateway => Ok(body.clone()),
            Translator::Vertex => vertex::transform_request(body, mode),
            Translator::Anthropic => anthropic::transform_request(body, mode),
        }
    }

    /// Rewrite a buffered 2xx provider body back into OpenAI shape.
    pub fn transform_response(
        &self,
        body: &Bytes,
        mode: &TransformMode,
    ) -> Result<TransformedResponse, TransformError> {
        match self {
            Translator::OpenAI | Translator::Gateway => Ok(TransformedResponse {
                body: body.clone(),
                usage: usage::from_openai_body(body),
            }),
            Translator::Vertex => vertex::transform_response(body, mode),
            Translator::Anthropic => anthropic::transform_response(body, mode),
        }
    }

    /// Streaming translator state, or `None` when the upstream already
    /// emits OpenAI chunks and the pump can copy bytes through.
    pub fn stream_translator(&self, model: &str) -> Option<StreamTranslator> {
        match self {
            Translator::OpenAI | Translator::Gateway => None,
            Translator::Vertex => Some(StreamTranslator::vertex(model)),
            Translator::Anthropic => Some(StreamTranslator::anthropic(model)),
        }
    }

    /// Provider key for the streaming usage extractor.
    pub fn usage_provider(&self) -> &'static str {
        match self {
            Translator::Anthropic => "anthropic",
            _ => "openai",
        }
    }
}
