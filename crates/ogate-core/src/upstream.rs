use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use ogate_common::Headers;
use tokio::sync::mpsc;
use wreq::Client;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMethod {
    Get,
    Post,
}

#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: UpstreamMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub want_stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Buffered(Bytes),
    /// Chunk channel fed by a reader task; closing the receiver cancels the
    /// upstream read.
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn is_event_stream(&self) -> bool {
        ogate_common::header_get(&self.headers, "content-type").is_some_and(|content_type| {
            content_type.contains("text/event-stream")
                || content_type.contains("application/stream+json")
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream timeout")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream response too large")]
    TooLarge,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub max_response_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
            stream_idle_timeout: Duration::from_secs(30),
            max_response_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Shared upstream HTTP client. One instance per process; wreq pools
/// connections per host and decompresses gzip/deflate bodies before they
/// reach us.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    config: UpstreamConfig,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let method = match req.method {
            UpstreamMethod::Get => wreq::Method::GET,
            UpstreamMethod::Post => wreq::Method::POST,
        };
        let mut builder = self.client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(map_error)?;
        let status = resp.status().as_u16();
        let headers = convert_headers(resp.headers());

        let success = (200..300).contains(&status);
        if !success || !req.want_stream {
            let body = read_buffered(resp, self.config.max_response_bytes).await?;
            return Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Buffered(body),
            });
        }

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let idle = self.config.stream_idle_timeout;
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle, stream.next()).await;
                let Ok(item) = next else {
                    break;
                };
                let Some(Ok(chunk)) = item else {
                    break;
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}

async fn read_buffered(resp: wreq::Response, limit: usize) -> Result<Bytes, UpstreamError> {
    let mut stream = resp.bytes_stream();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_error)?;
        if out.len() + chunk.len() > limit {
            return Err(UpstreamError::TooLarge);
        }
        out.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(out))
}

fn convert_headers(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}

fn map_error(err: wreq::Error) -> UpstreamError {
    if err.is_timeout() {
        return UpstreamError::Timeout;
    }
    UpstreamError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_stream_detection_reads_content_type() {
        let resp = UpstreamResponse {
            status: 200,
            headers: vec![(
                "content-type".to_string(),
                "text/event-stream; charset=utf-8".to_string(),
            )],
            body: UpstreamBody::Buffered(Bytes::new()),
        };
        assert!(resp.is_event_stream());

        let resp = UpstreamResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: UpstreamBody::Buffered(Bytes::new()),
        };
        assert!(!resp.is_event_stream());
    }
}
