//! Incremental parser for the streaming chat completion endpoint.
//!
//! The backend frames streamed chat tokens as Server-Sent-Events-style
//! `data: <json>` lines terminated by a `data: [DONE]` sentinel. Network
//! chunks can split lines anywhere, so the parser buffers partial lines
//! across calls to [`SseParser::push`].

use serde_json::Value;

/// One parsed frame from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A `data:` line carrying a JSON payload.
    Data(Value),
    /// The `[DONE]` sentinel; no further events follow.
    Done,
}

/// Stateful line parser. Feed it raw chunks as they arrive.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns the events completed by it.
    ///
    /// Lines without a `data:` prefix are ignored; `data:` lines that fail
    /// to parse as JSON are skipped with a warning rather than aborting the
    /// stream.
    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']).trim();

            if line.is_empty() {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.push(StreamEvent::Done);
                continue;
            }

            match serde_json::from_str(data) {
                Ok(value) => events.push(StreamEvent::Data(value)),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed stream line");
                }
            }
        }

        events
    }

    /// Bytes currently buffered as an incomplete line.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
