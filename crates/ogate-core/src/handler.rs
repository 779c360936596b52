use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, Uri, header::CONTENT_TYPE};
use ogate_common::{CredentialConfig, CredentialKind, TokenUsage, header_set};
use ogate_limits::{BalanceError, build_snapshot};
use ogate_protocol::openai::{ModelEntry, ModelList};
use ogate_protocol::sse::SseDecoder;
use ogate_translate::stream::StreamTranslator;
use ogate_translate::usage::estimate_prompt_tokens;
use ogate_translate::{Operation, TransformError, TransformMode, Translator};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::authenticate;
use crate::context::{RequestContext, merge_stream_usage_flag, parse_body, rewrite_model};
use crate::encoding;
use crate::error::{ErrorClass, GatewayError};
use crate::headers::{inbound_header_map, outbound_headers};
use crate::pump::{PumpOptions, PumpOutcome, UsageSniffer, pump};
use crate::retry::{MAX_ATTEMPTS, fallback_jitter, should_retry};
use crate::spend::{SpendLogEntry, SpendStatus};
use crate::state::AppState;
use crate::upstream::{UpstreamBody, UpstreamError, UpstreamMethod, UpstreamRequest};

/// Synthetic credential name for spend entries emitted before a real
/// credential was selected.
const SYSTEM_CREDENTIAL: &str = "system";

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    proxy(state, Operation::Chat, "/v1/chat/completions", uri, headers, body).await
}

pub async fn completions(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    proxy(state, Operation::Completions, "/v1/completions", uri, headers, body).await
}

pub async fn images(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    proxy(state, Operation::ImageGen, "/v1/images/generations", uri, headers, body).await
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    proxy(state, Operation::Embeddings, "/v1/embeddings", uri, headers, body).await
}

async fn proxy(
    state: Arc<AppState>,
    op: Operation,
    path: &'static str,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let identity = match authenticate(&headers, &state.config.master_key, state.spend.as_ref()).await
    {
        Ok(identity) => identity,
        Err(err) => return finish_error(&state, request_id, None, err),
    };
    let mut ctx = RequestContext::new(request_id, &identity);

    let max_body = state.config.max_body_bytes();
    let body_bytes = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let err = GatewayError::body_too_large(state.config.max_body_mb);
            return finish_error(&state, ctx.request_id.clone(), Some(&mut ctx), err);
        }
    };

    let facts = match parse_body(&body_bytes) {
        Ok(facts) => facts,
        Err(err) => return finish_error(&state, ctx.request_id.clone(), Some(&mut ctx), err),
    };
    ctx.streaming = facts.streaming;
    ctx.session_id = facts.session_id.clone();

    let (resolved_model, was_alias) = state.registry.resolve(&facts.model);
    ctx.model = resolved_model.clone();

    info!(
        event = "downstream_received",
        request_id = %ctx.request_id,
        op = ?op,
        model = %ctx.model,
        is_stream = ctx.streaming,
    );

    // Re-serialize only when the body actually changed.
    let mut value: Value = facts.value;
    let mut rewritten = false;
    if was_alias {
        rewrite_model(&mut value, &resolved_model);
        rewritten = true;
    }
    if ctx.streaming {
        merge_stream_usage_flag(&mut value);
        rewritten = true;
    }
    let forward_body = if rewritten {
        Bytes::from(value.to_string())
    } else {
        body_bytes.clone()
    };

    let mut current = match select_credential(&state, &ctx.model) {
        Ok(cred) => cred,
        Err(err) => return finish_error(&state, ctx.request_id.clone(), Some(&mut ctx), err),
    };

    loop {
        ctx.attempts += 1;
        ctx.tried.insert(current.name.clone());
        info!(
            event = "upstream_attempt",
            request_id = %ctx.request_id,
            credential = %current.name,
            attempt = ctx.attempts,
        );

        let outcome = forward_once(
            &state,
            &current,
            op,
            path,
            uri.query(),
            &headers,
            &forward_body,
            &mut ctx,
        )
        .await;

        match outcome {
            Err(err) => {
                let request_id = ctx.request_id.clone();
                return finish_error_with_credential(
                    &state,
                    request_id,
                    &mut ctx,
                    &current.name,
                    err,
                );
            }
            Ok(Forward::Stream {
                status,
                headers: upstream_headers,
                rx,
            }) => {
                let translator = Translator::for_kind(current.kind);
                return stream_response(
                    state.clone(),
                    current.clone(),
                    ctx,
                    translator,
                    status,
                    upstream_headers,
                    rx,
                    &forward_body,
                );
            }
            Ok(Forward::Buffered {
                status,
                headers: upstream_headers,
                body,
                usage,
            }) => {
                if !current.is_fallback
                    && ctx.attempts < MAX_ATTEMPTS
                    && let Some(reason) = should_retry(status, &body)
                    && let Some(fallback) = pick_fallback(&state, &ctx)
                {
                    info!(
                        event = "fallback_retry",
                        request_id = %ctx.request_id,
                        original_status = status,
                        reason = reason,
                        fallback = %fallback.name,
                    );
                    fallback_jitter().await;
                    current = fallback;
                    continue;
                }
                return finish_buffered(
                    &state,
                    &mut ctx,
                    &current,
                    &headers,
                    status,
                    upstream_headers,
                    body,
                    usage,
                );
            }
        }
    }
}

fn select_credential(
    state: &AppState,
    model: &str,
) -> Result<Arc<CredentialConfig>, GatewayError> {
    let primary = state.balancer.next_for(model);
    match primary {
        Ok(cred) => Ok(cred),
        Err(primary_err) => match state.balancer.next_fallback_for(model) {
            Ok(cred) => Ok(cred),
            Err(fallback_err) => {
                if primary_err == BalanceError::RateLimited
                    || fallback_err == BalanceError::RateLimited
                {
                    Err(GatewayError::rate_limited())
                } else {
                    Err(GatewayError::no_credentials())
                }
            }
        },
    }
}

fn pick_fallback(state: &AppState, ctx: &RequestContext) -> Option<Arc<CredentialConfig>> {
    let fallback = state.balancer.next_fallback_for(&ctx.model).ok()?;
    if ctx.tried.contains(&fallback.name) {
        return None;
    }
    Some(fallback)
}

enum Forward {
    Buffered {
        status: u16,
        headers: ogate_common::Headers,
        body: Bytes,
        usage: Option<TokenUsage>,
    },
    Stream {
        status: u16,
        headers: ogate_common::Headers,
        rx: mpsc::Receiver<Bytes>,
    },
}

#[allow(clippy::too_many_arguments)]
async fn forward_once(
    state: &Arc<AppState>,
    cred: &Arc<CredentialConfig>,
    op: Operation,
    path: &str,
    query: Option<&str>,
    client_headers: &HeaderMap,
    forward_body: &Bytes,
    ctx: &mut RequestContext,
) -> Result<Forward, GatewayError> {
    let translator = Translator::for_kind(cred.kind);
    let mode = TransformMode {
        op,
        streaming: ctx.streaming,
        model: ctx.model.clone(),
    };

    let upstream_body = translator
        .transform_request(forward_body, &mode)
        .map_err(map_transform_request_error)?;
    let url = translator.build_url(cred, path, query, &mode);

    let mut upstream_headers = outbound_headers(client_headers);
    header_set(&mut upstream_headers, "content-type", "application/json");
    set_upstream_auth(state, cred, client_headers, &mut upstream_headers).await?;

    let response = state
        .upstream
        .send(UpstreamRequest {
            method: UpstreamMethod::Post,
            url,
            headers: upstream_headers,
            body: Some(upstream_body),
            want_stream: ctx.streaming,
        })
        .await
        .map_err(|err| {
            let (status, mapped) = match err {
                UpstreamError::Timeout => (408, GatewayError::upstream_timeout()),
                UpstreamError::TooLarge => (502, GatewayError::upstream_too_large()),
                UpstreamError::Transport(message) => {
                    (502, GatewayError::upstream_transport(message))
                }
            };
            state.breaker.record(&cred.name, &ctx.model, status);
            mapped
        })?;

    state.breaker.record(&cred.name, &ctx.model, response.status);

    match response.body {
        UpstreamBody::Stream(rx) => Ok(Forward::Stream {
            status: response.status,
            headers: response.headers,
            rx,
        }),
        UpstreamBody::Buffered(body) => {
            let success = (200..300).contains(&response.status);
            if success && !translator.is_passthrough() {
                match translator.transform_response(&body, &mode) {
                    Ok(transformed) => Ok(Forward::Buffered {
                        status: response.status,
                        headers: response.headers,
                        body: transformed.body,
                        usage: transformed.usage,
                    }),
                    Err(err) => {
                        // A success body the codec cannot read passes
                        // through untransformed.
                        error!(
                            event = "response_translation_failed",
                            request_id = %ctx.request_id,
                            credential = %cred.name,
                            error = %err,
                        );
                        let usage = ogate_translate::usage::from_vertex_body(&body)
                            .or_else(|| ogate_translate::usage::from_openai_body(&body));
                        Ok(Forward::Buffered {
                            status: response.status,
                            headers: response.headers,
                            body,
                            usage,
                        })
                    }
                }
            } else {
                let usage = success
                    .then(|| ogate_translate::usage::from_openai_body(&body))
                    .flatten();
                Ok(Forward::Buffered {
                    status: response.status,
                    headers: response.headers,
                    body,
                    usage,
                })
            }
        }
    }
}

fn map_transform_request_error(err: TransformError) -> GatewayError {
    GatewayError::new(
        StatusCode::BAD_REQUEST,
        ErrorClass::TranslationFailed,
        err.to_string(),
    )
}

async fn set_upstream_auth(
    state: &AppState,
    cred: &CredentialConfig,
    client_headers: &HeaderMap,
    upstream_headers: &mut ogate_common::Headers,
) -> Result<(), GatewayError> {
    match cred.kind {
        CredentialKind::OpenAI => {
            header_set(
                upstream_headers,
                "authorization",
                format!("Bearer {}", cred.secret),
            );
        }
        CredentialKind::Gateway => {
            if cred.secret.is_empty() {
                // A secretless gateway credential forwards the caller's own
                // authorization.
                if let Some(auth) = client_headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                {
                    header_set(upstream_headers, "authorization", auth);
                }
            } else {
                header_set(
                    upstream_headers,
                    "authorization",
                    format!("Bearer {}", cred.secret),
                );
            }
        }
        CredentialKind::Vertex => {
            let token = state
                .tokens
                .get_token(&cred.name, cred.auth_file.as_deref(), cred.auth_json.as_deref())
                .await
                .map_err(|err| GatewayError::upstream_transport(err.to_string()))?;
            header_set(upstream_headers, "authorization", format!("Bearer {token}"));
        }
        CredentialKind::Anthropic => {
            header_set(upstream_headers, "x-api-key", cred.secret.clone());
            header_set(
                upstream_headers,
                "anthropic-version",
                ogate_protocol::anthropic::ANTHROPIC_VERSION,
            );
        }
    }
    Ok(())
}

/// Build the streaming response and hand the rest of the request lifetime
/// to a background task: pump bytes, then account usage and emit the spend
/// entry once the stream closes.
#[allow(clippy::too_many_arguments)]
fn stream_response(
    state: Arc<AppState>,
    cred: Arc<CredentialConfig>,
    mut task_ctx: RequestContext,
    translator: Translator,
    status: u16,
    upstream_headers: ogate_common::Headers,
    upstream_rx: mpsc::Receiver<Bytes>,
    request_body: &Bytes,
) -> Response {
    let prompt_estimate = estimate_prompt_tokens(request_body);
    let request_id = task_ctx.request_id.clone();
    let (client_tx, client_rx) = mpsc::channel::<Bytes>(16);

    let state_task = state.clone();
    let cred_task = cred.clone();
    let stream_translator = translator.stream_translator(&task_ctx.model);
    let provider = translator.usage_provider();
    let write_timeout = Duration::from_secs(state.config.stream_write_timeout_secs);

    tokio::spawn(async move {
        let (outcome, usage) = match stream_translator {
            Some(xlat) => {
                let (pipe_tx, pipe_rx) = mpsc::channel::<Bytes>(16);
                let translator_task = spawn_stream_translator(upstream_rx, xlat, pipe_tx);
                let outcome = pump(
                    pipe_rx,
                    client_tx,
                    &state_task.pool,
                    PumpOptions {
                        write_timeout,
                        ..Default::default()
                    },
                )
                .await;
                // The translator task must be done before its usage is read.
                let usage = match translator_task.await {
                    Ok(usage) => usage,
                    Err(err) => {
                        if err.is_panic() {
                            error!(event = "stream_translator_panic", request_id = %task_ctx.request_id);
                        }
                        None
                    }
                };
                (outcome, usage)
            }
            None => {
                let sniffer = Arc::new(Mutex::new(UsageSniffer::new(provider, prompt_estimate)));
                let sniffer_cb = sniffer.clone();
                let outcome = pump(
                    upstream_rx,
                    client_tx,
                    &state_task.pool,
                    PumpOptions {
                        write_timeout,
                        on_chunk: Some(Box::new(move |chunk| {
                            sniffer_cb.lock().expect("sniffer lock").push(chunk);
                        })),
                        on_write_error: None,
                    },
                )
                .await;
                let usage = Arc::try_unwrap(sniffer)
                    .ok()
                    .and_then(|mutex| mutex.into_inner().ok())
                    .map(UsageSniffer::finish);
                (outcome, usage)
            }
        };

        let mut final_usage = TokenUsage {
            prompt_tokens: prompt_estimate,
            ..Default::default()
        };
        match usage {
            Some(usage) => final_usage.merge_latest(usage),
            None => final_usage.total_tokens = final_usage.prompt_tokens,
        }
        task_ctx.usage = final_usage;

        state_task
            .limiter
            .consume(&cred_task.name, final_usage.total_tokens);
        state_task
            .limiter
            .consume_model(&cred_task.name, &task_ctx.model, final_usage.total_tokens);

        let error = match outcome {
            PumpOutcome::Completed => None,
            PumpOutcome::ClientGone => {
                debug!(event = "stream_client_disconnected", request_id = %task_ctx.request_id);
                None
            }
            PumpOutcome::WriteTimeout => Some("stream_write_timeout".to_string()),
        };
        emit_spend(&state_task, &mut task_ctx, &cred_task.name, status, error);
        info!(
            event = "downstream_responded",
            request_id = %task_ctx.request_id,
            credential = %cred_task.name,
            status = status,
            elapsed_ms = task_ctx.started_at.elapsed().as_millis() as u64,
            is_stream = true,
        );
    });

    let stream = ReceiverStream::new(client_rx).map(Ok::<Bytes, std::convert::Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    *response.headers_mut() = inbound_header_map(&upstream_headers);
    if translator.is_passthrough() {
        if !response.headers().contains_key(CONTENT_TYPE) {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        }
    } else {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    }
    attach_request_id(&mut response, &request_id);
    response
}

fn spawn_stream_translator(
    mut upstream: mpsc::Receiver<Bytes>,
    mut translator: StreamTranslator,
    pipe: mpsc::Sender<Bytes>,
) -> tokio::task::JoinHandle<Option<TokenUsage>> {
    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = upstream.recv().await {
            for event in decoder.feed(&chunk) {
                for frame in translator.push_data(&event.data) {
                    if pipe.send(frame).await.is_err() {
                        return translator.usage();
                    }
                }
            }
        }
        for event in decoder.finish() {
            for frame in translator.push_data(&event.data) {
                if pipe.send(frame).await.is_err() {
                    return translator.usage();
                }
            }
        }
        for frame in translator.finish() {
            if pipe.send(frame).await.is_err() {
                break;
            }
        }
        translator.usage()
    })
}

#[allow(clippy::too_many_arguments)]
fn finish_buffered(
    state: &AppState,
    ctx: &mut RequestContext,
    cred: &CredentialConfig,
    client_headers: &HeaderMap,
    status: u16,
    upstream_headers: ogate_common::Headers,
    body: Bytes,
    usage: Option<TokenUsage>,
) -> Response {
    if let Some(usage) = usage {
        ctx.usage = usage;
        state.limiter.consume(&cred.name, usage.total_tokens);
        state
            .limiter
            .consume_model(&cred.name, &ctx.model, usage.total_tokens);
    }

    let success = (200..300).contains(&status);
    let error = (!success).then(|| format!("upstream_status_{status}"));
    emit_spend(state, ctx, &cred.name, status, error);

    info!(
        event = "downstream_responded",
        request_id = %ctx.request_id,
        credential = %cred.name,
        status = status,
        elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
        is_stream = false,
    );

    let accept = client_headers
        .get("accept-encoding")
        .and_then(|value| value.to_str().ok());
    let (body, applied) = encoding::compress(encoding::negotiate(accept), body);

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    *response.headers_mut() = inbound_header_map(&upstream_headers);
    if !response.headers().contains_key(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if let Some(coding) = applied.header_value()
        && let Ok(value) = HeaderValue::from_str(coding)
    {
        response.headers_mut().insert("content-encoding", value);
    }
    attach_request_id(&mut response, &ctx.request_id);
    response
}

/// Terminal gateway-generated failure: emit the spend entry (if not yet
/// emitted) and return the error envelope.
fn finish_error(
    state: &AppState,
    request_id: String,
    ctx: Option<&mut RequestContext>,
    err: GatewayError,
) -> Response {
    let status = err.status.as_u16();
    match ctx {
        Some(ctx) => {
            emit_spend(state, ctx, SYSTEM_CREDENTIAL, status, Some(err.class_tag().to_string()));
        }
        None => {
            // Auth failed before a context existed; emit a bare entry so
            // every request path leaves exactly one spend record.
            let now = OffsetDateTime::now_utc();
            let entry = SpendLogEntry {
                request_id: request_id.clone(),
                started_at: now,
                finished_at: now,
                model: String::new(),
                credential: SYSTEM_CREDENTIAL.to_string(),
                status: SpendStatus::Failure,
                http_status: status,
                usage: TokenUsage::default(),
                cost: 0.0,
                session_id: None,
                end_user: None,
                token_hash: String::new(),
                error: Some(err.class_tag().to_string()),
            };
            if state.spend.log_spend(entry).is_err() {
                warn!(event = "spend_queue_full", request_id = %request_id);
            }
        }
    }
    let mut response = err.into_response();
    attach_request_id(&mut response, &request_id);
    response
}

fn finish_error_with_credential(
    state: &AppState,
    request_id: String,
    ctx: &mut RequestContext,
    credential: &str,
    err: GatewayError,
) -> Response {
    emit_spend(
        state,
        ctx,
        credential,
        err.status.as_u16(),
        Some(err.class_tag().to_string()),
    );
    let mut response = err.into_response();
    attach_request_id(&mut response, &request_id);
    response
}

fn emit_spend(
    state: &AppState,
    ctx: &mut RequestContext,
    credential: &str,
    http_status: u16,
    error: Option<String>,
) {
    if ctx.logged {
        return;
    }
    ctx.logged = true;

    let success = (200..300).contains(&http_status) && error.is_none();
    let cost = state
        .prices
        .get_price(&ctx.model)
        .map(|price| price.calculate_cost(&ctx.usage))
        .unwrap_or(0.0);
    let entry = SpendLogEntry {
        request_id: ctx.request_id.clone(),
        started_at: ctx.started_wall,
        finished_at: OffsetDateTime::now_utc(),
        model: ctx.model.clone(),
        credential: credential.to_string(),
        status: if success {
            SpendStatus::Success
        } else {
            SpendStatus::Failure
        },
        http_status,
        usage: ctx.usage,
        cost,
        session_id: ctx.session_id.clone(),
        end_user: ctx.end_user.clone(),
        token_hash: ctx.token_hash.clone(),
        error,
    };
    // Spend logging never blocks the request path; a full queue drops the
    // entry.
    if state.spend.log_spend(entry).is_err() {
        warn!(event = "spend_queue_full", request_id = %ctx.request_id);
    }
}

fn attach_request_id(response: &mut Response, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-ogate-request-id", value);
    }
}

pub async fn models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate(&headers, &state.config.master_key, state.spend.as_ref()).await
    {
        return err.into_response();
    }
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let list = ModelList {
        object: "list".to_string(),
        data: state
            .registry
            .known_models()
            .into_iter()
            .map(|id| ModelEntry {
                id,
                object: "model".to_string(),
                created,
                owned_by: "ogate".to_string(),
            })
            .collect(),
    };
    json_response(StatusCode::OK, &list)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = snapshot_of(&state);
    json_response(StatusCode::OK, &snapshot)
}

pub async fn vhealth(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = snapshot_of(&state);
    let html = state.renderer.render(&snapshot);
    let mut response = Response::new(Body::from(html));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn snapshot_of(state: &AppState) -> ogate_limits::HealthSnapshot {
    let pairs: Vec<(String, String)> = state
        .credentials
        .iter()
        .map(|cred| (cred.name.clone(), cred.kind.as_str().to_string()))
        .collect();
    build_snapshot(&pairs, &state.limiter, &state.breaker)
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
