use bytes::Bytes;
use ogate_common::TokenUsage;
use ogate_protocol::anthropic;
use ogate_protocol::openai;

use crate::stream::{new_chat_id, now_unix};
use crate::{Operation, TransformError, TransformMode, TransformedResponse};

/// Default output budget when the client did not pass `max_tokens`; the
/// Anthropic API requires the field.
const DEFAULT_MAX_TOKENS: i64 = 4096;

pub fn transform_request(body: &Bytes, mode: &TransformMode) -> Result<Bytes, TransformError> {
    if mode.op == Operation::ImageGen || mode.op == Operation::Embeddings {
        return Err(TransformError::Unsupported("anthropic non-chat operation"));
    }
    let req: openai::ChatRequest = serde_json::from_slice(body)
        .map_err(|err| TransformError::BadRequest(err.to_string()))?;

    let mut system_texts = Vec::new();
    let mut messages = Vec::new();
    for message in &req.messages {
        let text = message.content.flat_text();
        if message.role == "system" {
            if !text.is_empty() {
                system_texts.push(text);
            }
            continue;
        }
        if text.is_empty() {
            continue;
        }
        let role = if message.role == "assistant" {
            "assistant"
        } else {
            "user"
        };
        messages.push(anthropic::Message {
            role: role.to_string(),
            content: vec![anthropic::ContentBlock::Text { text }],
        });
    }

    let out = anthropic::MessagesRequest {
        model: mode.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system_texts.is_empty()).then(|| system_texts.join("\n")),
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req
            .stop
            .clone()
            .map(|stop| stop.into_vec())
            .unwrap_or_default(),
        stream: mode.streaming.then_some(true),
    };
    serde_json::to_vec(&out)
        .map(Bytes::from)
        .map_err(|err| TransformError::BadRequest(err.to_string()))
}

pub fn transform_response(
    body: &Bytes,
    mode: &TransformMode,
) -> Result<TransformedResponse, TransformError> {
    let resp: anthropic::MessagesResponse = serde_json::from_slice(body)
        .map_err(|err| TransformError::BadResponse(err.to_string()))?;

    let text: String = resp
        .content
        .iter()
        .filter_map(|block| match block {
            anthropic::ContentBlock::Text { text } => Some(text.as_str()),
            anthropic::ContentBlock::Unknown => None,
        })
        .collect();

    let usage = token_usage(&resp.usage);
    let out = openai::ChatResponse {
        id: new_chat_id(),
        object: "chat.completion".to_string(),
        created: now_unix(),
        model: mode.model.clone(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ResponseMessage {
                role: "assistant".to_string(),
                content: Some(text),
                images: None,
            },
            finish_reason: Some(
                anthropic::finish_reason(resp.stop_reason.as_deref().unwrap_or("end_turn"))
                    .to_string(),
            ),
        }],
        usage: Some(openai::Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            prompt_tokens_details: (usage.cached_tokens > 0).then_some(
                openai::PromptTokensDetails {
                    cached_tokens: usage.cached_tokens,
                    audio_tokens: 0,
                },
            ),
            completion_tokens_details: None,
        }),
    };
    let body = serde_json::to_vec(&out)
        .map(Bytes::from)
        .map_err(|err| TransformError::BadResponse(err.to_string()))?;
    Ok(TransformedResponse {
        body,
        usage: Some(usage),
    })
}

pub fn token_usage(usage: &anthropic::MessagesUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        cached_tokens: usage.cache_read_input_tokens,
        cache_creation_tokens: usage.cache_creation_input_tokens,
        ..Default::default()
    }
}
