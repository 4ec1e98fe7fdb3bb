// ABOUTME: Shared SSE line-buffering parser for LLM streaming responses
// ABOUTME: Handles partial lines across TCP boundaries and multiple events per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # SSE Stream Parser
//!
//! Server-Sent Events arrive newline-delimited, but TCP does not align
//! network chunks with event boundaries: one chunk may carry several events,
//! and one JSON payload may be split across two chunks. The line buffer
//! accumulates bytes and emits complete events only when a full line is
//! available.

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the JSON string (prefix stripped)
    Data(String),
    /// The `[DONE]` termination signal (OpenAI convention)
    Done,
}

/// Line-buffering SSE parser that survives partial lines across chunk
/// boundaries
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from a network chunk, returning any complete events.
    ///
    /// Complete lines (terminated by `\n`) are extracted and parsed; any
    /// trailing partial line stays buffered for the next `feed` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=newline);

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "data: [DONE]" {
                events.push(SseEvent::Done);
                continue;
            }
            if let Some(data) = trimmed.strip_prefix("data: ") {
                if !data.trim().is_empty() {
                    events.push(SseEvent::Data(data.to_owned()));
                }
            }
            // Non-data SSE fields (event:, id:, retry:, comments) are ignored.
        }
        events
    }

    /// Flush a trailing unterminated `data:` line as a final event
    pub fn flush(&mut self) -> Option<SseEvent> {
        let trimmed = self.buffer.trim().to_owned();
        self.buffer.clear();

        if trimmed == "data: [DONE]" {
            return Some(SseEvent::Done);
        }
        trimmed
            .strip_prefix("data: ")
            .filter(|data| !data.trim().is_empty())
            .map(|data| SseEvent::Data(data.to_owned()))
    }
}
