//! Event-stream message assembly
//!
//! Consumes lines produced by [`LineSplitter`](super::LineSplitter) and builds
//! [`SseMessage`] values, following the event-stream interpretation rules:
//! <https://html.spec.whatwg.org/multipage/server-sent-events.html#event-stream-interpretation>

use serde::{Deserialize, Serialize};

const SPACE: u8 = b' ';

/// One decoded event-stream message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseMessage {
    /// `data` values joined with `\n`
    pub data: String,

    /// Last `event` value
    pub event: String,

    /// Last `id` value
    pub id: String,

    /// Reconnection time in milliseconds, when a valid `retry` field was seen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

impl SseMessage {
    /// Create an empty message
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this is the done marker for OpenAI-style streams
    #[must_use]
    pub fn is_done_marker(&self) -> bool {
        self.data == "[DONE]"
    }
}

/// Receives what the assembler produces
pub trait MessageSink {
    /// A blank line closed a message
    fn on_message(&mut self, message: SseMessage);

    /// An `id` field was seen; `id` may be empty
    fn on_id(&mut self, _id: &str) {}

    /// A `retry` field with a valid integer was seen
    fn on_retry(&mut self, _retry: u64) {}
}

impl MessageSink for Vec<SseMessage> {
    fn on_message(&mut self, message: SseMessage) {
        self.push(message);
    }
}

/// Builds messages out of lines
#[derive(Debug, Default)]
pub struct MessageAssembler {
    message: SseMessage,
}

impl MessageAssembler {
    /// Create a new assembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one line; `field_length` is the offset of its first colon
    pub fn on_line<S>(&mut self, line: &[u8], field_length: Option<usize>, sink: &mut S)
    where
        S: MessageSink + ?Sized,
    {
        if line.is_empty() {
            // empty messages are emitted too
            sink.on_message(std::mem::take(&mut self.message));
            return;
        }

        // comments and lines without a value
        let Some(field_length) = field_length.filter(|&len| len > 0) else {
            return;
        };

        let field = String::from_utf8_lossy(&line[..field_length]);
        let value_offset = field_length
            + if line.get(field_length + 1) == Some(&SPACE) {
                2
            } else {
                1
            };
        let value = String::from_utf8_lossy(line.get(value_offset..).unwrap_or_default());

        match field.as_ref() {
            "data" => {
                if !self.message.data.is_empty() {
                    self.message.data.push('\n');
                }
                self.message.data.push_str(&value);
            }
            "event" => self.message.event = value.into_owned(),
            "id" => {
                self.message.id = value.into_owned();
                sink.on_id(&self.message.id);
            }
            "retry" => {
                if let Some(retry) = parse_retry(&value) {
                    self.message.retry = Some(retry);
                    sink.on_retry(retry);
                }
            }
            _ => {}
        }
    }
}

/// Parse a `retry` value as a base-10 integer.
///
/// Leading whitespace and one `+` are skipped and parsing stops at the
/// first non-digit; a value without leading digits is rejected. Negative
/// values are rejected since an interval cannot be below zero.
fn parse_retry(value: &str) -> Option<u64> {
    let value = value.trim_start();
    let value = value.strip_prefix('+').unwrap_or(value);
    let digits = value
        .find(|c: char| !c.is_ascii_digit())
        .map_or(value, |end| &value[..end]);
    digits.parse().ok()
}
