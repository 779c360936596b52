use bytes::Bytes;
use ogate_common::TokenUsage;
use ogate_protocol::openai;
use ogate_protocol::vertex;

use crate::stream::{new_chat_id, now_unix};
use crate::{Operation, TransformError, TransformMode, TransformedResponse};

pub const TRUNCATED_TEXT: &str = "[Response truncated due to max tokens limit]";
pub const EMPTY_TEXT: &str = "[No content generated]";

pub fn transform_request(body: &Bytes, mode: &TransformMode) -> Result<Bytes, TransformError> {
    match mode.op {
        Operation::ImageGen => image_request(body),
        Operation::Chat | Operation::Completions => chat_request(body),
        Operation::Embeddings => Err(TransformError::Unsupported("vertex embeddings")),
    }
}

fn chat_request(body: &Bytes) -> Result<Bytes, TransformError> {
    let req: openai::ChatRequest = serde_json::from_slice(body)
        .map_err(|err| TransformError::BadRequest(err.to_string()))?;

    let mut contents = Vec::new();
    let mut system_texts = Vec::new();
    for message in &req.messages {
        if message.role == "system" {
            let text = message.content.flat_text();
            if !text.is_empty() {
                system_texts.push(text);
            }
            continue;
        }
        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        let parts = message_parts(&message.content);
        if parts.is_empty() {
            continue;
        }
        contents.push(vertex::Content {
            role: Some(role.to_string()),
            parts,
        });
    }

    let system_instruction = (!system_texts.is_empty()).then(|| vertex::Content {
        role: None,
        parts: vec![vertex::Part::Text(system_texts.join("\n"))],
    });

    let generation_config = vertex::GenerationConfig {
        temperature: req.temperature,
        max_output_tokens: req.max_tokens,
        top_p: req.top_p,
        stop_sequences: req.stop.clone().map(|stop| stop.into_vec()),
        candidate_count: req.n,
        seed: req.seed,
        frequency_penalty: req.frequency_penalty,
        presence_penalty: req.presence_penalty,
    };
    let has_config = serde_json::to_value(&generation_config)
        .map(|value| value.as_object().is_some_and(|map| !map.is_empty()))
        .unwrap_or(false);

    let out = vertex::GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: has_config.then_some(generation_config),
    };
    serde_json::to_vec(&out)
        .map(Bytes::from)
        .map_err(|err| TransformError::BadRequest(err.to_string()))
}

fn message_parts(content: &openai::MessageContent) -> Vec<vertex::Part> {
    match content {
        openai::MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![vertex::Part::Text(text.clone())]
            }
        }
        openai::MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                openai::ContentPart::Text { text } => Some(vertex::Part::Text(text.clone())),
                openai::ContentPart::ImageUrl { image_url } => {
                    // Only data: URLs can be inlined; remote URLs are dropped.
                    parse_data_url(&image_url.url).map(vertex::Part::InlineData)
                }
            })
            .collect(),
    }
}

fn parse_data_url(url: &str) -> Option<vertex::InlineData> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta
        .split(';')
        .next()
        .filter(|mime| !mime.is_empty())
        .unwrap_or("application/octet-stream");
    Some(vertex::InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

fn image_request(body: &Bytes) -> Result<Bytes, TransformError> {
    let req: openai::ImagesRequest = serde_json::from_slice(body)
        .map_err(|err| TransformError::BadRequest(err.to_string()))?;
    let out = vertex::PredictRequest {
        instances: vec![vertex::PredictInstance { prompt: req.prompt }],
        parameters: vertex::PredictParameters {
            sample_count: req.n.unwrap_or(1),
            aspect_ratio: aspect_ratio(req.size.as_deref()).to_string(),
            safety_filter_level: "block_some".to_string(),
            person_generation: "allow_adult".to_string(),
        },
    };
    serde_json::to_vec(&out)
        .map(Bytes::from)
        .map_err(|err| TransformError::BadRequest(err.to_string()))
}

fn aspect_ratio(size: Option<&str>) -> &'static str {
    match size {
        Some("1792x1024") => "16:9",
        Some("1024x1792") => "9:16",
        _ => "1:1",
    }
}

pub fn transform_response(
    body: &Bytes,
    mode: &TransformMode,
) -> Result<TransformedResponse, TransformError> {
    match mode.op {
        Operation::ImageGen => image_response(body),
        _ => chat_response(body, mode),
    }
}

fn chat_response(body: &Bytes, mode: &TransformMode) -> Result<TransformedResponse, TransformError> {
    let resp: vertex::GenerateContentResponse = serde_json::from_slice(body)
        .map_err(|err| TransformError::BadResponse(err.to_string()))?;

    let mut choices = Vec::new();
    for (index, candidate) in resp.candidates.iter().enumerate() {
        let (text, images) = candidate_content(candidate);
        let finish = candidate.finish_reason.as_deref();
        let content = if text.is_empty() {
            if finish == Some("MAX_TOKENS") {
                TRUNCATED_TEXT.to_string()
            } else if images.is_empty() {
                EMPTY_TEXT.to_string()
            } else {
                String::new()
            }
        } else {
            text
        };
        choices.push(openai::ChatChoice {
            index: index as i64,
            message: openai::ResponseMessage {
                role: "assistant".to_string(),
                content: Some(content),
                images: (!images.is_empty()).then_some(images),
            },
            finish_reason: Some(finish_reason(finish).to_string()),
        });
    }

    let usage = resp.usage_metadata.map(usage_from_metadata);
    let out = openai::ChatResponse {
        id: new_chat_id(),
        object: "chat.completion".to_string(),
        created: now_unix(),
        model: mode.model.clone(),
        choices,
        usage: usage.map(openai_usage),
    };
    let body = serde_json::to_vec(&out)
        .map(Bytes::from)
        .map_err(|err| TransformError::BadResponse(err.to_string()))?;
    Ok(TransformedResponse { body, usage })
}

fn candidate_content(candidate: &vertex::Candidate) -> (String, Vec<openai::ResponseImage>) {
    let mut text = String::new();
    let mut images = Vec::new();
    if let Some(content) = &candidate.content {
        for part in &content.parts {
            match part {
                vertex::Part::Text(chunk) => text.push_str(chunk),
                vertex::Part::InlineData(inline) => images.push(openai::ResponseImage {
                    b64_json: inline.data.clone(),
                }),
            }
        }
    }
    (text, images)
}

pub fn finish_reason(finish: Option<&str>) -> &'static str {
    match finish {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") | Some("RECITATION") => "content_filter",
        _ => "stop",
    }
}

pub fn usage_from_metadata(meta: vertex::UsageMetadata) -> TokenUsage {
    TokenUsage {
        prompt_tokens: meta.prompt_token_count,
        completion_tokens: meta.candidates_token_count,
        total_tokens: meta.total_token_count,
        cached_tokens: meta.cached_content_token_count,
        ..Default::default()
    }
}

fn openai_usage(usage: TokenUsage) -> openai::Usage {
    openai::Usage {
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
    }
}

fn image_response(body: &Bytes) -> Result<TransformedResponse, TransformError> {
    let resp: vertex::PredictResponse = serde_json::from_slice(body)
        .map_err(|err| TransformError::BadResponse(err.to_string()))?;
    let out = openai::ImagesResponse {
        created: now_unix(),
        data: resp
            .predictions
            .into_iter()
            .filter_map(|prediction| prediction.bytes_base64_encoded)
            .map(|b64_json| openai::ImageDatum {
                b64_json: Some(b64_json),
                url: None,
            })
            .collect(),
    };
    let body = serde_json::to_vec(&out)
        .map(Bytes::from)
        .map_err(|err| TransformError::BadResponse(err.to_string()))?;
    Ok(TransformedResponse { body, usage: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_mode() -> TransformMode {
        TransformMode {
            op: Operation::Chat,
            streaming: false,
            model: "gemini-2.0-flash".to_string(),
        }
    }

    #[test]
    fn chat_request_maps_roles_and_system() {
        let body = Bytes::from_static(
            br#"{"model":"gemini-2.0-flash","messages":[
                {"role":"system","content":"be terse"},
                {"role":"user","content":"hi"},
                {"role":"assistant","content":"hello"}
            ],"temperature":0.5,"max_tokens":64,"top_p":0.9,"stop":["END"],"n":2,"seed":7}"#,
        );
        let out = transform_request(&body, &chat_mode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        let config = &value["generationConfig"];
        assert_eq!(config["temperature"], 0.5);
        assert_eq!(config["maxOutputTokens"], 64);
        assert_eq!(config["topP"], 0.9);
        assert_eq!(config["stopSequences"][0], "END");
        assert_eq!(config["candidateCount"], 2);
        assert_eq!(config["seed"], 7);
    }

    #[test]
    fn data_urls_become_inline_data_and_remote_urls_drop() {
        let body = Bytes::from_static(
            br#"{"model":"m","messages":[{"role":"user","content":[
                {"type":"text","text":"look"},
                {"type":"image_url","image_url":{"url":"data:image/png;base64,QUJD"}},
                {"type":"image_url","image_url":{"url":"https://example.com/cat.png"}}
            ]}]}"#,
        );
        let out = transform_request(&body, &chat_mode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let parts = value["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "QUJD");
    }

    #[test]
    fn chat_round_trip_preserves_message_text() {
        let body = Bytes::from_static(
            br#"{"model":"m","messages":[{"role":"user","content":"the exact words"}]}"#,
        );
        let out = transform_request(&body, &chat_mode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "the exact words");
    }

    #[test]
    fn image_request_maps_size_to_aspect_ratio() {
        let body = Bytes::from_static(
            br#"{"model":"imagen-3.0","prompt":"a cat","n":2,"size":"1024x1792"}"#,
        );
        let mode = TransformMode {
            op: Operation::ImageGen,
            streaming: false,
            model: "imagen-3.0".to_string(),
        };
        let out = transform_request(&body, &mode).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "instances": [{"prompt": "a cat"}],
                "parameters": {
                    "sampleCount": 2,
                    "aspectRatio": "9:16",
                    "safetyFilterLevel": "block_some",
                    "personGeneration": "allow_adult"
                }
            })
        );
    }

    #[test]
    fn response_concatenates_parts_and_maps_finish_reason() {
        let body = Bytes::from_static(
            br#"{"candidates":[{"content":{"role":"model","parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}],
                 "usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":2,"totalTokenCount":7}}"#,
        );
        let out = transform_response(&body, &chat_mode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "ab");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 7);
        assert_eq!(out.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn empty_candidate_text_yields_placeholder() {
        let truncated = Bytes::from_static(
            br#"{"candidates":[{"content":{"role":"model","parts":[]},"finishReason":"MAX_TOKENS"}]}"#,
        );
        let out = transform_response(&truncated, &chat_mode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], TRUNCATED_TEXT);
        assert_eq!(value["choices"][0]["finish_reason"], "length");

        let empty = Bytes::from_static(br#"{"candidates":[{"finishReason":"STOP"}]}"#);
        let out = transform_response(&empty, &chat_mode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], EMPTY_TEXT);
    }

    #[test]
    fn safety_maps_to_content_filter() {
        assert_eq!(finish_reason(Some("SAFETY")), "content_filter");
        assert_eq!(finish_reason(Some("RECITATION")), "content_filter");
        assert_eq!(finish_reason(Some("OTHER")), "stop");
        assert_eq!(finish_reason(None), "stop");
    }

    #[test]
    fn predictions_become_b64_json() {
        let body = Bytes::from_static(
            br#"{"predictions":[{"bytesBase64Encoded":"QUE="},{"bytesBase64Encoded":"QkI="}]}"#,
        );
        let mode = TransformMode {
            op: Operation::ImageGen,
            streaming: false,
            model: "imagen-3.0".to_string(),
        };
        let out = transform_response(&body, &mode).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(value["data"][0]["b64_json"], "QUE=");
        assert_eq!(value["data"][1]["b64_json"], "QkI=");
    }
}
