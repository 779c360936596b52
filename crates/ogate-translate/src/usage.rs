use bytes::Bytes;
use ogate_common::TokenUsage;
use serde_json::Value;

/// Pull OpenAI-shape usage out of a buffered response body.
pub fn from_openai_body(body: &Bytes) -> Option<TokenUsage> {
    let value: Value = serde_json::from_slice(body).ok()?;
    from_openai_value(value.get("usage")?)
}

fn from_openai_value(usage: &Value) -> Option<TokenUsage> {
    let prompt = usage.get("prompt_tokens").and_then(Value::as_i64);
    let completion = usage.get("completion_tokens").and_then(Value::as_i64);
    let total = usage.get("total_tokens").and_then(Value::as_i64);
    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }
    let prompt = prompt.unwrap_or(0);
    let completion = completion.unwrap_or(0);
    Some(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total.unwrap_or(prompt + completion),
        cached_tokens: nested(usage, "prompt_tokens_details", "cached_tokens"),
        audio_input_tokens: nested(usage, "prompt_tokens_details", "audio_tokens"),
        audio_output_tokens: nested(usage, "completion_tokens_details", "audio_tokens"),
        reasoning_tokens: nested(usage, "completion_tokens_details", "reasoning_tokens"),
        cache_creation_tokens: 0,
    })
}

fn nested(usage: &Value, details: &str, field: &str) -> i64 {
    usage
        .get(details)
        .and_then(|value| value.get(field))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Vertex buffered usage, for accounting on the untranslated error path.
pub fn from_vertex_body(body: &Bytes) -> Option<TokenUsage> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let meta = value.get("usageMetadata")?;
    let total = meta.get("totalTokenCount").and_then(Value::as_i64)?;
    Some(TokenUsage {
        prompt_tokens: meta
            .get("promptTokenCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        completion_tokens: meta
            .get("candidatesTokenCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        total_tokens: total,
        cached_tokens: meta
            .get("cachedContentTokenCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        ..Default::default()
    })
}

/// Streaming usage sidecar. Keyed on the provider whose payloads flow to
/// the client; OpenAI is the universal fallback because every translated
/// stream is OpenAI-shaped by the time it reaches the pump.
#[derive(Debug)]
pub enum UsageExtractor {
    OpenAI { latest: Option<TokenUsage> },
    Anthropic { latest: Option<TokenUsage> },
}

impl UsageExtractor {
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "anthropic" => UsageExtractor::Anthropic { latest: None },
            _ => UsageExtractor::OpenAI { latest: None },
        }
    }

    /// Inspect one SSE payload; the latest usage-bearing chunk wins.
    pub fn push_data(&mut self, data: &str) {
        if data == "[DONE]" {
            return;
        }
        match self {
            UsageExtractor::OpenAI { latest } => {
                let Ok(value) = serde_json::from_str::<Value>(data) else {
                    return;
                };
                if let Some(usage) = value.get("usage").and_then(from_openai_value) {
                    *latest = Some(usage);
                }
            }
            UsageExtractor::Anthropic { latest } => {
                let Ok(value) = serde_json::from_str::<Value>(data) else {
                    return;
                };
                let usage = value
                    .get("usage")
                    .or_else(|| value.get("message").and_then(|m| m.get("usage")));
                let Some(usage) = usage else { return };
                let input = usage.get("input_tokens").and_then(Value::as_i64);
                let output = usage.get("output_tokens").and_then(Value::as_i64);
                if input.is_none() && output.is_none() {
                    return;
                }
                let mut snapshot = latest.unwrap_or_default();
                if let Some(input) = input {
                    snapshot.prompt_tokens = snapshot.prompt_tokens.max(input);
                }
                if let Some(output) = output {
                    snapshot.completion_tokens = snapshot.completion_tokens.max(output);
                }
                snapshot.cached_tokens = snapshot.cached_tokens.max(
                    usage
                        .get("cache_read_input_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                );
                snapshot.cache_creation_tokens = snapshot.cache_creation_tokens.max(
                    usage
                        .get("cache_creation_input_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                );
                snapshot.total_tokens = snapshot.prompt_tokens + snapshot.completion_tokens;
                *latest = Some(snapshot);
            }
        }
    }

    pub fn latest(&self) -> Option<TokenUsage> {
        match self {
            UsageExtractor::OpenAI { latest } | UsageExtractor::Anthropic { latest } => *latest,
        }
    }
}

/// Rough prompt-size floor used when a stream ends without reporting
/// prompt tokens: one token per four characters of message text, minimum 1.
pub fn estimate_prompt_tokens(body: &Bytes) -> i64 {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return 1;
    };
    let mut chars = 0usize;
    if let Some(messages) = value.get("messages").and_then(Value::as_array) {
        for message in messages {
            match message.get("content") {
                Some(Value::String(text)) => chars += text.chars().count(),
                Some(Value::Array(parts)) => {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            chars += text.chars().count();
                        }
                    }
                }
                _ => {}
            }
        }
    } else if let Some(prompt) = value.get("prompt").and_then(Value::as_str) {
        chars = prompt.chars().count();
    }
    ((chars / 4) as i64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_extractor_keeps_latest_usage_chunk() {
        let mut extractor = UsageExtractor::for_provider("openai");
        extractor.push_data(r#"{"choices":[{"delta":{"content":"x"}}]}"#);
        assert!(extractor.latest().is_none());
        extractor.push_data(
            r#"{"choices":[{"finish_reason":"stop","delta":{}}],"usage":{"prompt_tokens":100,"completion_tokens":50,"total_tokens":150}}"#,
        );
        extractor.push_data("[DONE]");
        let usage = extractor.latest().unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.completion_tokens, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn anthropic_extractor_merges_start_and_delta() {
        let mut extractor = UsageExtractor::for_provider("anthropic");
        extractor.push_data(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":40,"output_tokens":1}}}"#,
        );
        extractor.push_data(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":25}}"#,
        );
        let usage = extractor.latest().unwrap();
        assert_eq!(usage.prompt_tokens, 40);
        assert_eq!(usage.completion_tokens, 25);
        assert_eq!(usage.total_tokens, 65);
    }

    #[test]
    fn unknown_provider_falls_back_to_openai() {
        let extractor = UsageExtractor::for_provider("vertex");
        assert!(matches!(extractor, UsageExtractor::OpenAI { .. }));
    }

    #[test]
    fn prompt_estimate_counts_message_text() {
        let body = Bytes::from_static(
            br#"{"model":"m","messages":[{"role":"user","content":"abcdefgh"},{"role":"user","content":[{"type":"text","text":"12345678"}]}]}"#,
        );
        assert_eq!(estimate_prompt_tokens(&body), 4);
    }

    #[test]
    fn prompt_estimate_has_a_floor_of_one() {
        let body = Bytes::from_static(br#"{"model":"m","messages":[]}"#);
        assert_eq!(estimate_prompt_tokens(&body), 1);
    }

    #[test]
    fn vertex_body_usage_maps_token_counts() {
        let body = Bytes::from_static(
            br#"{"usageMetadata":{"promptTokenCount":6,"candidatesTokenCount":4,"totalTokenCount":10}}"#,
        );
        let usage = from_vertex_body(&body).unwrap();
        assert_eq!(usage.total_tokens, 10);
    }
}
