use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use ogate_common::TokenUsage;
use ogate_protocol::sse::SseDecoder;
use ogate_translate::usage::UsageExtractor;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Process-wide pool of fixed-size copy blocks shared by streaming and
/// body copies.
#[derive(Debug)]
pub struct BufferPool {
    blocks: Mutex<Vec<Vec<u8>>>,
    block_size: usize,
}

pub const BLOCK_SIZE: usize = 8 * 1024;

impl BufferPool {
    pub fn new(block_size: usize) -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            block_size,
        }
    }

    pub fn get(&self) -> Vec<u8> {
        self.blocks
            .lock()
            .expect("pool lock")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.block_size))
    }

    pub fn put(&self, mut block: Vec<u8>) {
        block.clear();
        let mut blocks = self.blocks.lock().expect("pool lock");
        if blocks.len() < 64 {
            blocks.push(block);
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BLOCK_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Upstream finished and every byte reached the client.
    Completed,
    /// The client went away mid-stream.
    ClientGone,
    /// A single write exceeded the deadline.
    WriteTimeout,
}

pub struct PumpOptions {
    pub write_timeout: Duration,
    /// Observes every upstream chunk (usage sidecar).
    pub on_chunk: Option<Box<dyn FnMut(&[u8]) + Send>>,
    /// Fired exactly once if the client write fails.
    pub on_write_error: Option<Box<dyn FnOnce() + Send>>,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(60),
            on_chunk: None,
            on_write_error: None,
        }
    }
}

/// Copy upstream chunks to the client channel through a pooled block,
/// arming a fresh write deadline before every send. The block returns to
/// the pool on every exit path.
pub async fn pump(
    mut upstream: mpsc::Receiver<Bytes>,
    client: mpsc::Sender<Bytes>,
    pool: &BufferPool,
    mut opts: PumpOptions,
) -> PumpOutcome {
    let mut block = pool.get();
    let block_size = pool.block_size().max(1);
    let mut outcome = PumpOutcome::Completed;

    'read: while let Some(chunk) = upstream.recv().await {
        if let Some(on_chunk) = opts.on_chunk.as_mut() {
            on_chunk(&chunk);
        }
        for slice in chunk.chunks(block_size) {
            block.clear();
            block.extend_from_slice(slice);
            let frame = Bytes::copy_from_slice(&block);
            match tokio::time::timeout(opts.write_timeout, client.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!(event = "stream_client_gone");
                    outcome = PumpOutcome::ClientGone;
                    break 'read;
                }
                Err(_) => {
                    warn!(event = "stream_write_timeout");
                    outcome = PumpOutcome::WriteTimeout;
                    break 'read;
                }
            }
        }
    }

    pool.put(block);
    if outcome != PumpOutcome::Completed
        && let Some(on_write_error) = opts.on_write_error.take()
    {
        on_write_error();
    }
    outcome
}

/// Usage-extraction sidecar: decodes SSE frames out of raw chunk bytes and
/// keeps the latest usage-bearing payload. The prompt estimate computed
/// before streaming began lower-bounds prompt tokens if the stream never
/// reports them.
pub struct UsageSniffer {
    decoder: SseDecoder,
    extractor: UsageExtractor,
    prompt_estimate: i64,
}

impl UsageSniffer {
    pub fn new(provider: &str, prompt_estimate: i64) -> Self {
        Self {
            decoder: SseDecoder::new(),
            extractor: UsageExtractor::for_provider(provider),
            prompt_estimate,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let bytes = Bytes::copy_from_slice(chunk);
        for event in self.decoder.feed(&bytes) {
            self.extractor.push_data(&event.data);
        }
    }

    pub fn finish(mut self) -> TokenUsage {
        for event in self.decoder.finish() {
            self.extractor.push_data(&event.data);
        }
        let mut usage = TokenUsage {
            prompt_tokens: self.prompt_estimate,
            ..Default::default()
        };
        if let Some(latest) = self.extractor.latest() {
            usage.merge_latest(latest);
        } else {
            usage.total_tokens = usage.prompt_tokens;
        }
        usage
    }
}
