use bytes::Bytes;
use ogate_common::TokenUsage;
use ogate_protocol::anthropic;
use ogate_protocol::openai;
use ogate_protocol::sse::{done_frame, frame_data};
use ogate_protocol::vertex;

use crate::{anthropic as anthropic_codec, vertex as vertex_codec};

pub fn new_chat_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Emits OpenAI `chat.completion.chunk` frames with a stable per-stream id.
/// The first chunk carries `role: assistant`; later chunks carry content
/// only; the terminal chunk carries the finish reason (and usage when the
/// provider reported it).
struct ChunkEmitter {
    id: String,
    model: String,
    role_sent: bool,
}

impl ChunkEmitter {
    fn new(model: &str) -> Self {
        Self {
            id: new_chat_id(),
            model: model.to_string(),
            role_sent: false,
        }
    }

    fn chunk(&self, choices: Vec<openai::ChunkChoice>, usage: Option<openai::Usage>) -> Bytes {
        let chunk = openai::ChatChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: now_unix(),
            model: self.model.clone(),
            choices,
            usage,
        };
        match serde_json::to_vec(&chunk) {
            Ok(payload) => frame_data(&payload),
            Err(_) => Bytes::new(),
        }
    }

    fn role(&mut self, index: i64) -> Option<Bytes> {
        if self.role_sent {
            return None;
        }
        self.role_sent = true;
        Some(self.chunk(
            vec![openai::ChunkChoice {
                index,
                delta: openai::ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                },
                finish_reason: None,
            }],
            None,
        ))
    }

    fn content(&mut self, index: i64, text: String) -> Vec<Bytes> {
        let mut out = Vec::new();
        if let Some(role) = self.role(index) {
            out.push(role);
        }
        out.push(self.chunk(
            vec![openai::ChunkChoice {
                index,
                delta: openai::ChunkDelta {
                    role: None,
                    content: Some(text),
                },
                finish_reason: None,
            }],
            None,
        ));
        out
    }

    fn finish(&mut self, index: i64, reason: &str, usage: Option<openai::Usage>) -> Vec<Bytes> {
        let mut out = Vec::new();
        if let Some(role) = self.role(index) {
            out.push(role);
        }
        out.push(self.chunk(
            vec![openai::ChunkChoice {
                index,
                delta: openai::ChunkDelta::default(),
                finish_reason: Some(reason.to_string()),
            }],
            usage,
        ));
        out
    }
}

/// Per-stream translation state for providers whose SSE shape is not
/// OpenAI's. Fed decoded SSE payloads, returns ready-to-send frames.
pub enum StreamTranslator {
    Vertex(VertexStream),
    Anthropic(AnthropicStream),
}

impl StreamTranslator {
    pub fn vertex(model: &str) -> Self {
        StreamTranslator::Vertex(VertexStream {
            emitter: ChunkEmitter::new(model),
            usage: None,
            finished: false,
        })
    }

    pub fn anthropic(model: &str) -> Self {
        StreamTranslator::Anthropic(AnthropicStream {
            emitter: ChunkEmitter::new(model),
            usage: TokenUsage::default(),
            saw_usage: false,
            stop_reason: None,
            finished: false,
        })
    }

    /// Translate one SSE `data:` payload. Malformed payloads are dropped;
    /// a single bad chunk never aborts the stream.
    pub fn push_data(&mut self, data: &str) -> Vec<Bytes> {
        match self {
            StreamTranslator::Vertex(state) => state.push(data),
            StreamTranslator::Anthropic(state) => state.push(data),
        }
    }

    /// Upstream EOF: close the stream, emitting the terminator (and a
    /// synthesized finish chunk if the provider never sent one).
    pub fn finish(&mut self) -> Vec<Bytes> {
        match self {
            StreamTranslator::Vertex(state) => state.finish(),
            StreamTranslator::Anthropic(state) => state.finish(),
        }
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            StreamTranslator::Vertex(state) => state.usage,
            StreamTranslator::Anthropic(state) => state.saw_usage.then_some(state.usage),
        }
    }
}

pub struct VertexStream {
    emitter: ChunkEmitter,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl VertexStream {
    fn push(&mut self, data: &str) -> Vec<Bytes> {
        if self.finished || data == "[DONE]" {
            return Vec::new();
        }
        let Ok(resp) = serde_json::from_str::<vertex::GenerateContentResponse>(data) else {
            return Vec::new();
        };
        if let Some(meta) = resp.usage_metadata {
            self.usage = Some(vertex_codec::usage_from_metadata(meta));
        }
        let mut out = Vec::new();
        for (index, candidate) in resp.candidates.iter().enumerate() {
            let index = index as i64;
            let mut text = String::new();
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let vertex::Part::Text(chunk) = part {
                        text.push_str(chunk);
                    }
                }
            }
            if !text.is_empty() {
                out.extend(self.emitter.content(index, text));
            }
            if let Some(finish) = candidate.finish_reason.as_deref() {
                let reason = vertex_codec::finish_reason(Some(finish));
                out.extend(self.emitter.finish(index, reason, None));
                self.finished = true;
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if !self.finished {
            out.extend(self.emitter.finish(0, "stop", None));
            self.finished = true;
        }
        out.push(done_frame());
        out
    }
}

pub struct AnthropicStream {
    emitter: ChunkEmitter,
    usage: TokenUsage,
    saw_usage: bool,
    stop_reason: Option<String>,
    finished: bool,
}

impl AnthropicStream {
    fn push(&mut self, data: &str) -> Vec<Bytes> {
        if self.finished {
            return Vec::new();
        }
        let Ok(event) = serde_json::from_str::<anthropic::StreamEvent>(data) else {
            return Vec::new();
        };
        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.merge_usage(usage);
                }
                self.emitter.role(0).into_iter().collect()
            }
            anthropic::StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                anthropic::ContentDelta::TextDelta { text } => self.emitter.content(0, text),
                anthropic::ContentDelta::Other => Vec::new(),
            },
            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.merge_usage(usage);
                }
                if let Some(stop) = delta.stop_reason {
                    self.stop_reason = Some(stop);
                }
                Vec::new()
            }
            anthropic::StreamEvent::MessageStop => self.close(),
            _ => Vec::new(),
        }
    }

    fn merge_usage(&mut self, usage: anthropic::MessagesUsage) {
        let incoming = anthropic_codec::token_usage(&usage);
        if !self.saw_usage {
            self.usage = incoming;
        } else {
            // message_delta usually repeats input tokens as zero; keep the
            // widest value seen per field.
            self.usage.prompt_tokens = self.usage.prompt_tokens.max(incoming.prompt_tokens);
            self.usage.completion_tokens =
                self.usage.completion_tokens.max(incoming.completion_tokens);
            self.usage.cached_tokens = self.usage.cached_tokens.max(incoming.cached_tokens);
            self.usage.cache_creation_tokens = self
                .usage
                .cache_creation_tokens
                .max(incoming.cache_creation_tokens);
            self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
        }
        self.saw_usage = true;
    }

    fn close(&mut self) -> Vec<Bytes> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let reason = anthropic::finish_reason(self.stop_reason.as_deref().unwrap_or("end_turn"));
        let usage = self.saw_usage.then(|| openai::Usage {
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            total_tokens: self.usage.total_tokens,
            prompt_tokens_details: None,
            completion_tokens_details: None,
        });
        let mut out = self.emitter.finish(0, reason, usage);
        out.push(done_frame());
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        // Upstream ended without message_stop.
        self.close()
    }
}
