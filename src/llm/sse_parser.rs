// ABOUTME: Shared SSE line-buffering parser for LLM streaming responses
// ABOUTME: Handles partial lines across TCP boundaries and multiple events per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # SSE Stream Parser
//!
//! A line-buffering parser for the server-sent-event framing used by
//! OpenAI-compatible backends. Solves two correctness issues:
//!
//! 1. **Multiple events per TCP chunk**: when network buffers batch several
//!    SSE events into a single `bytes_stream()` chunk, all events are
//!    emitted, not just the first.
//!
//! 2. **Partial payloads across TCP boundaries**: when a JSON payload is
//!    split across two chunks, the buffer accumulates until a complete line
//!    arrives.

use std::mem;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the JSON string (prefix stripped)
    Data(String),
    /// The `[DONE]` termination signal
    Done,
}

/// Line-buffering SSE parser
///
/// SSE streams are newline-delimited; TCP does not guarantee alignment
/// between network chunks and event boundaries. Incomplete lines stay
/// buffered until a terminating `\n` arrives.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated bytes not yet terminated by a newline
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from a TCP chunk, returning any complete SSE events
    ///
    /// Complete lines are extracted and parsed; any trailing partial line
    /// remains buffered for the next `feed()` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_owned();
            self.buffer = self.buffer[newline_pos + 1..].to_owned();

            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush any remaining buffered content as a final event
    ///
    /// Called when the byte stream ends with a partial line (no trailing
    /// newline) still in the buffer.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        parse_line(&remaining).into_iter().collect()
    }
}

/// Parse one SSE line into an event
///
/// Empty lines (event separators) and non-data fields (`event:`, `id:`,
/// `retry:`, comments) yield nothing.
fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return None;
    }

    if trimmed == "data: [DONE]" {
        return Some(SseEvent::Done);
    }

    let data = trimmed.strip_prefix("data: ")?;
    if data.trim().is_empty() {
        return None;
    }
    Some(SseEvent::Data(data.to_owned()))
}
