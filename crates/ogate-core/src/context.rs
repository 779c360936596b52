use std::collections::HashSet;
use std::time::Instant;

use bytes::Bytes;
use ogate_common::TokenUsage;
use serde_json::Value;
use time::OffsetDateTime;

use crate::auth::AuthIdentity;
use crate::error::GatewayError;

/// Per-request state owned by the orchestrator for the request's lifetime.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub started_at: Instant,
    pub started_wall: OffsetDateTime,
    pub token_hash: String,
    pub user_id: Option<String>,
    pub end_user: Option<String>,
    pub model: String,
    pub streaming: bool,
    pub session_id: Option<String>,
    pub tried: HashSet<String>,
    pub attempts: u32,
    pub usage: TokenUsage,
    /// Guards at-most-once spend emission.
    pub logged: bool,
}

impl RequestContext {
    pub fn new(request_id: String, identity: &AuthIdentity) -> Self {
        Self {
            request_id,
            started_at: Instant::now(),
            started_wall: OffsetDateTime::now_utc(),
            token_hash: identity.token_hash.clone(),
            user_id: identity.user_id.clone(),
            end_user: identity.end_user.clone(),
            model: String::new(),
            streaming: false,
            session_id: None,
            tried: HashSet::new(),
            attempts: 0,
            usage: TokenUsage::default(),
            logged: false,
        }
    }
}

/// Facts extracted from the client body before forwarding.
#[derive(Debug)]
pub struct BodyFacts {
    pub value: Value,
    pub model: String,
    pub streaming: bool,
    pub session_id: Option<String>,
}

pub fn parse_body(body: &Bytes) -> Result<BodyFacts, GatewayError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| GatewayError::bad_request(format!("invalid JSON body: {err}")))?;
    let model = value
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .ok_or_else(GatewayError::model_missing)?
        .to_string();
    let streaming = value.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let session_id = extract_session_id(&value);
    Ok(BodyFacts {
        model,
        streaming,
        session_id,
        value,
    })
}

/// Session attribution, first match wins.
fn extract_session_id(value: &Value) -> Option<String> {
    let extra = value.get("extra_body");
    let candidates = [
        extra.and_then(|extra| extra.get("litellm_session_id")),
        extra.and_then(|extra| extra.get("chat_id")),
        extra.and_then(|extra| extra.get("session_id")),
        value.get("session_id"),
        value.get("user"),
        value.get("safety_identifier"),
        value.get("prompt_cache_key"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| candidate.as_str())
        .map(|session| session.to_string())
}

/// Ask the upstream to report usage on the final stream chunk.
pub fn merge_stream_usage_flag(value: &mut Value) {
    if let Some(map) = value.as_object_mut() {
        let options = map
            .entry("stream_options")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(options) = options.as_object_mut() {
            options.insert("include_usage".to_string(), Value::Bool(true));
        }
    }
}

/// Rewrite the body's model field after alias resolution.
pub fn rewrite_model(value: &mut Value, model: &str) {
    if let Some(map) = value.as_object_mut() {
        map.insert("model".to_string(), Value::String(model.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_is_required_and_non_empty() {
        assert!(parse_body(&Bytes::from_static(b"{}")).is_err());
        assert!(parse_body(&Bytes::from_static(br#"{"model":""}"#)).is_err());
        assert!(parse_body(&Bytes::from_static(br#"{"model":"  "}"#)).is_err());
        let facts = parse_body(&Bytes::from_static(br#"{"model":"gpt-4o"}"#)).unwrap();
        assert_eq!(facts.model, "gpt-4o");
        assert!(!facts.streaming);
    }

    #[test]
    fn session_id_chain_first_match_wins() {
        let facts = parse_body(&Bytes::from_static(
            br#"{"model":"m","user":"u-9","extra_body":{"session_id":"s-extra","chat_id":"c-1"}}"#,
        ))
        .unwrap();
        assert_eq!(facts.session_id.as_deref(), Some("c-1"));

        let facts = parse_body(&Bytes::from_static(
            br#"{"model":"m","prompt_cache_key":"pck"}"#,
        ))
        .unwrap();
        assert_eq!(facts.session_id.as_deref(), Some("pck"));
    }

    #[test]
    fn stream_usage_flag_merges_into_existing_options() {
        let mut value: Value =
            serde_json::from_str(r#"{"model":"m","stream":true,"stream_options":{"x":1}}"#)
                .unwrap();
        merge_stream_usage_flag(&mut value);
        assert_eq!(value["stream_options"]["include_usage"], true);
        assert_eq!(value["stream_options"]["x"], 1);

        let mut bare: Value = serde_json::from_str(r#"{"model":"m"}"#).unwrap();
        merge_stream_usage_flag(&mut bare);
        assert_eq!(bare["stream_options"]["include_usage"], true);
    }

    #[test]
    fn alias_rewrite_replaces_model_field() {
        let mut value: Value = serde_json::from_str(r#"{"model":"fast"}"#).unwrap();
        rewrite_model(&mut value, "gpt-4o-mini");
        assert_eq!(value["model"], "gpt-4o-mini");
    }
}
