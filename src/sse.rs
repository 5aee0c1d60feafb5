//! Parser for the newline-delimited streaming response protocol.
//!
//! The backend replies with a stream of `data: `-prefixed JSON records, one
//! per line. Only those lines carry events; anything else (keep-alive
//! comments, blank lines) is ignored. A malformed payload is logged and
//! skipped; one bad record never aborts the stream.

use crate::error::Error;
use crate::model::StreamEvent;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

// ============================================================================
// Record Parser
// ============================================================================

/// Incremental line parser. Feed arbitrary chunk boundaries; complete lines
/// are decoded as they arrive and a trailing unterminated line is held until
/// [`RecordParser::flush`].
#[derive(Debug, Default)]
pub struct RecordParser {
    buffer: String,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one complete line. Returns `None` for non-record lines and for
    /// payloads that fail to parse.
    fn parse_line(line: &str) -> Option<StreamEvent> {
        let payload = line.strip_prefix("data:")?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        match serde_json::from_str(payload) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!(error = %err, line = %line, "Skipping malformed stream record");
                None
            }
        }
    }

    /// Feed data to the parser and extract any complete events.
    pub fn feed(&mut self, data: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(data);
        let mut events = Vec::new();

        let mut buffer = std::mem::take(&mut self.buffer);
        let mut start = 0usize;

        while let Some(rel_pos) = memchr::memchr2(b'\r', b'\n', &buffer.as_bytes()[start..]) {
            let pos = start + rel_pos;
            let b = buffer.as_bytes()[pos];

            let line_end;
            let next_start;

            if b == b'\n' {
                line_end = pos;
                next_start = pos + 1;
            } else if pos + 1 < buffer.len() {
                line_end = pos;
                next_start = if buffer.as_bytes()[pos + 1] == b'\n' {
                    pos + 2
                } else {
                    pos + 1
                };
            } else {
                // CR at end of buffer - wait for more data to check for \n.
                break;
            }

            if let Some(event) = Self::parse_line(&buffer[start..line_end]) {
                events.push(event);
            }
            start = next_start;
        }

        if start > 0 {
            buffer.drain(..start);
        }
        self.buffer = buffer;
        events
    }

    /// Whether an unterminated line is buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Decode any trailing line without a newline (called at stream end).
    pub fn flush(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        Self::parse_line(line.trim_end_matches('\r'))
    }
}

// ============================================================================
// Event Stream
// ============================================================================

/// Adapter converting a byte stream into a [`StreamEvent`] stream.
///
/// Handles UTF-8 sequences split across chunk boundaries; bytes that can
/// never form a valid sequence are dropped with a warning rather than
/// aborting the stream.
pub struct EventStream<S> {
    inner: S,
    parser: RecordParser,
    pending_events: VecDeque<StreamEvent>,
    utf8_tail: Vec<u8>,
    done: bool,
}

impl<S> EventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: RecordParser::new(),
            pending_events: VecDeque::new(),
            utf8_tail: Vec::new(),
            done: false,
        }
    }
}

impl<S> EventStream<S>
where
    S: Stream<Item = Result<Vec<u8>, Error>> + Unpin,
{
    fn process_chunk(&mut self, bytes: Vec<u8>) {
        let mut pending = std::mem::take(&mut self.utf8_tail);
        pending.extend_from_slice(&bytes);

        loop {
            match std::str::from_utf8(&pending) {
                Ok(s) => {
                    self.pending_events.extend(self.parser.feed(s));
                    pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    if valid_len > 0 {
                        // Valid prefix is guaranteed UTF-8 by valid_up_to.
                        let s = std::str::from_utf8(&pending[..valid_len]).unwrap_or_default();
                        self.pending_events.extend(self.parser.feed(s));
                    }
                    match err.error_len() {
                        Some(invalid_len) => {
                            tracing::warn!(bytes = invalid_len, "Dropping invalid UTF-8 in stream");
                            pending.drain(..valid_len + invalid_len);
                        }
                        None => {
                            // Incomplete sequence at chunk end - keep the tail.
                            pending.drain(..valid_len);
                            break;
                        }
                    }
                }
            }
        }

        self.utf8_tail = pending;
    }
}

impl<S> Stream for EventStream<S>
where
    S: Stream<Item = Result<Vec<u8>, Error>> + Unpin,
{
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending_events.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.process_chunk(bytes),
                Poll::Ready(Some(Err(err))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if let Some(event) = self.parser.flush() {
                        self.pending_events.push_back(event);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
