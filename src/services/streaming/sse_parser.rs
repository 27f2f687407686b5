//! Server-Sent Events (SSE) parser
//!
//! Combines [`LineSplitter`] and [`MessageAssembler`] into a byte-level
//! parser that also remembers the last event id and the retry interval
//! announced by the server.

use std::time::Duration;

use bytes::Bytes;

use super::{LineSplitter, MessageAssembler, MessageSink, SseMessage};

/// Reconnection interval used until the server announces one
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// SSE parser for streaming responses
///
/// One parser per stream; it is not shared between connections.
#[derive(Debug)]
pub struct SseParser {
    splitter: LineSplitter,
    assembler: MessageAssembler,
    state: StreamState,
}

/// Side effects of `id` and `retry` fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    /// Most recent non-empty `id`; cleared by an empty one
    pub last_event_id: Option<String>,

    /// Reconnection interval announced by the server
    pub retry: Duration,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            last_event_id: None,
            retry: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Routes assembler output into the stream state and a message sink
struct Tracking<'a, S: ?Sized> {
    state: &'a mut StreamState,
    sink: &'a mut S,
}

impl<S: MessageSink + ?Sized> MessageSink for Tracking<'_, S> {
    fn on_message(&mut self, message: SseMessage) {
        self.sink.on_message(message);
    }

    fn on_id(&mut self, id: &str) {
        self.state.last_event_id = if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        };
        self.sink.on_id(id);
    }

    fn on_retry(&mut self, retry: u64) {
        self.state.retry = Duration::from_millis(retry);
        self.sink.on_retry(retry);
    }
}

impl SseParser {
    /// Create a new SSE parser
    #[must_use]
    pub fn new() -> Self {
        Self {
            splitter: LineSplitter::new(),
            assembler: MessageAssembler::new(),
            state: StreamState::default(),
        }
    }

    /// Parse a chunk of SSE data
    ///
    /// Returns completed messages. Incomplete lines and messages are buffered
    /// until the next call.
    pub fn parse_chunk(&mut self, chunk: impl Into<Bytes>) -> Vec<SseMessage> {
        let mut messages = Vec::new();
        self.feed(chunk.into(), &mut messages);
        messages
    }

    /// Feed a chunk, delivering messages and field side effects to `sink`
    pub fn feed<S>(&mut self, chunk: Bytes, sink: &mut S)
    where
        S: MessageSink + ?Sized,
    {
        let Self {
            splitter,
            assembler,
            state,
        } = self;
        let mut tracking = Tracking { state, sink };

        splitter.feed(chunk, |line, field_length| {
            assembler.on_line(line, field_length, &mut tracking);
        });
    }

    /// Last event id and retry interval seen so far
    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Most recent non-empty event id
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.state.last_event_id.as_deref()
    }

    /// Current reconnection interval
    #[must_use]
    pub fn retry(&self) -> Duration {
        self.state.retry
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}
