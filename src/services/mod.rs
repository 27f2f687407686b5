//! Network layer for remote LLM endpoints
//!
//! - [`streaming`]: byte-level SSE and plain-text decoding
//! - [`http`]: cancellable client with buffered and streaming modes
//! - [`api`]: envelope-aware client for assistant backend services

pub mod api;
pub mod http;
pub mod streaming;

pub use api::{ServiceClient, ServiceReply};
pub use http::{
    AbortController, AbortReason, AbortSignal, CancellableOperation, Canceller, ChannelHandler,
    FetchClient, FetchOutput, RequestOptions, StreamEvent, StreamHandler, StreamSummary,
};
pub use streaming::{MessageType, SseMessage, SseParser, StreamItem};
