//! Byte-level Server-Sent-Events frame parser.
//!
//! Feed bytes with [`SseParser::consume`] or [`SseParser::feed`], call
//! [`SseParser::finish`] once the transfer ends to flush an unterminated
//! trailing record, and drain [`SseParser::next_event`] until it returns
//! `None`. The parser has no network awareness; its output depends only on
//! byte order, never on how the bytes were chunked.

use std::collections::VecDeque;

use tracing::trace;

/// One dispatched SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the record carried one.
    pub name: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The last event ID seen on the stream.
    pub id: Option<String>,
}

impl SseEvent {
    /// Event name with the SSE default applied.
    pub fn kind(&self) -> &str {
        self.name.as_deref().unwrap_or("message")
    }
}

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Incremental parser for SSE byte streams.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    /// A CR ended the previous line; swallow a directly following LF.
    after_cr: bool,
    /// The first line has been seen, so a leading BOM is no longer possible.
    started: bool,
    name: Option<String>,
    data: String,
    last_id: Option<String>,
    ready: VecDeque<SseEvent>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, byte: u8) {
        if self.after_cr {
            self.after_cr = false;
            if byte == b'\n' {
                return;
            }
        }
        match byte {
            b'\r' => {
                self.after_cr = true;
                self.end_line();
            }
            b'\n' => self.end_line(),
            _ => self.line.push(byte),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.consume(byte);
        }
    }

    /// Flushes a trailing record that was not followed by a blank line.
    pub fn finish(&mut self) {
        if !self.line.is_empty() {
            self.end_line();
        }
        self.after_cr = false;
        self.dispatch();
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.ready.pop_front()
    }

    /// True when no partial line or record is buffered.
    pub fn is_idle(&self) -> bool {
        self.line.is_empty() && self.data.is_empty() && self.name.is_none()
    }

    fn end_line(&mut self) {
        let mut line = std::mem::take(&mut self.line);
        if !self.started {
            self.started = true;
            if line.starts_with(BOM) {
                line.drain(..BOM.len());
            }
        }
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line[0] == b':' {
            return;
        }

        let line = String::from_utf8_lossy(&line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => {
                if value.contains('\0') {
                    trace!("Ignoring SSE id containing NUL");
                } else {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => trace!(value, "Ignoring SSE retry field"),
            other => trace!(field = other, "Ignoring unknown SSE field"),
        }
    }

    fn dispatch(&mut self) {
        let name = self.name.take();
        if self.data.is_empty() {
            return;
        }
        let mut data = std::mem::take(&mut self.data);
        data.pop();
        self.ready.push_back(SseEvent {
            name,
            data,
            id: self.last_id.clone(),
        });
    }
}

/// Parses a complete buffer in one shot.
pub fn parse_all(bytes: &[u8]) -> Vec<SseEvent> {
    let mut parser = SseParser::new();
    parser.feed(bytes);
    parser.finish();
    std::iter::from_fn(|| parser.next_event()).collect()
}
