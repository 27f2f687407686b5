//! Streaming support for AI model responses
//!
//! Byte-level infrastructure for Server-Sent Events (SSE) and plain-text
//! streams: line splitting, message assembly and incremental UTF-8 decoding.

pub mod line_splitter;
pub mod message;
pub mod sse_parser;
pub mod text_decoder;

pub use line_splitter::LineSplitter;
pub use message::{MessageAssembler, MessageSink, SseMessage};
pub use sse_parser::{SseParser, StreamState, DEFAULT_RETRY_INTERVAL};
pub use text_decoder::Utf8StreamDecoder;

use serde::{Deserialize, Serialize};

/// How a streaming response body is decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Standard event stream, e.g. `event: message\ndata: hello\n\n`
    Sse,

    /// Raw text chunks, for endpoints that stream bare text
    #[default]
    PlainText,
}

/// One item delivered to a stream handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StreamItem {
    /// A complete event-stream message
    Event(SseMessage),

    /// A decoded slice of a plain-text body
    Text(String),
}

impl StreamItem {
    /// The textual payload: message data or the text itself
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Event(message) => &message.data,
            Self::Text(text) => text,
        }
    }
}
