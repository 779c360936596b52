use bytes::Bytes;

/// One parsed SSE event: the optional `event:` name and the joined `data:`
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub name: Option<String>,
    pub data: String,
}

/// Incremental server-sent-events decoder. Feed it arbitrary byte chunks;
/// complete events come back as they close (on a blank line). Carries
/// partial lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    tail: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let mut buf;
        let input: &[u8] = if self.tail.is_empty() {
            chunk
        } else {
            buf = std::mem::take(&mut self.tail);
            buf.extend_from_slice(chunk);
            &buf
        };

        let mut start = 0;
        for (idx, byte) in input.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            let mut line = &input[start..idx];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            self.take_line(line, &mut events);
            start = idx + 1;
        }
        if start < input.len() {
            self.tail = input[start..].to_vec();
        }
        events
    }

    /// Flush a trailing event that was never closed by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.tail.is_empty() {
            let mut line = std::mem::take(&mut self.tail);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.take_line(&line, &mut events);
        }
        self.close_event(&mut events);
        events
    }

    fn take_line(&mut self, line: &[u8], events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.close_event(events);
            return;
        }
        // Comment lines.
        if line[0] == b':' {
            return;
        }
        let (field, value) = match line.iter().position(|b| *b == b':') {
            Some(pos) => {
                let mut value = &line[pos + 1..];
                if value.first() == Some(&b' ') {
                    value = &value[1..];
                }
                (&line[..pos], value)
            }
            None => (line, &[][..]),
        };
        let value = String::from_utf8_lossy(value).into_owned();
        match field {
            b"event" => self.name = (!value.is_empty()).then_some(value),
            b"data" => self.data.push(value),
            _ => {}
        }
    }

    fn close_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.name.is_none() && self.data.is_empty() {
            return;
        }
        events.push(SseEvent {
            name: self.name.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        });
    }
}

/// Frame a JSON payload as an SSE `data:` line.
pub fn frame_data(payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\n\n");
    Bytes::from(out)
}

/// The OpenAI stream terminator frame.
pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(decoder: &mut SseDecoder, text: &str) -> Vec<SseEvent> {
        decoder.feed(&Bytes::copy_from_slice(text.as_bytes()))
    }

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(feed_str(&mut decoder, "data: {\"a\"").is_empty());
        let events = feed_str(&mut decoder, ":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "[DONE]");
    }

    #[test]
    fn joins_multiline_data_and_keeps_event_name() {
        let mut decoder = SseDecoder::new();
        let events = feed_str(
            &mut decoder,
            "event: message_delta\ndata: line1\ndata: line2\n\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some("message_delta"));
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn ignores_comments_and_handles_crlf() {
        let mut decoder = SseDecoder::new();
        let events = feed_str(&mut decoder, ": keepalive\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(feed_str(&mut decoder, "data: tail").is_empty());
        let events = decoder.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }
}
