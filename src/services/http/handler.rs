//! Callback surface for streaming responses

use async_trait::async_trait;
use futures::Stream;
use reqwest::{header::HeaderMap, StatusCode};
use tokio::sync::mpsc;
use tracing::trace;

use crate::{error::Result, services::streaming::StreamItem, AssistError};

/// Status line and headers of a response, before its body is read
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: String,
}

impl From<&reqwest::Response> for ResponseHead {
    fn from(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            url: response.url().to_string(),
        }
    }
}

/// Receives the lifecycle of one streaming response.
///
/// Methods run inline with the read loop, so a slow handler stalls the
/// stream. Per call, either [`on_close`](Self::on_close) or the rejection of
/// the operation happens exactly once; [`on_error`](Self::on_error) is not
/// called for cancellations or timeouts.
#[async_trait]
pub trait StreamHandler: Send {
    /// The response was accepted; the body has not been read yet
    async fn on_open(&mut self, _head: &ResponseHead) -> Result<()> {
        Ok(())
    }

    /// A message (SSE) or decoded text (plain text) arrived
    fn on_message(&mut self, item: StreamItem);

    /// The body ended normally
    fn on_close(&mut self) {}

    /// Streaming failed for a reason other than an abort
    fn on_error(&mut self, _error: &AssistError) {}
}

/// Adapts a closure into a handler that only cares about messages
pub struct FnHandler<F>(F);

/// Build a [`StreamHandler`] from a message closure
pub fn handler_fn<F>(on_message: F) -> FnHandler<F>
where
    F: FnMut(StreamItem) + Send,
{
    FnHandler(on_message)
}

#[async_trait]
impl<F> StreamHandler for FnHandler<F>
where
    F: FnMut(StreamItem) + Send,
{
    fn on_message(&mut self, item: StreamItem) {
        (self.0)(item);
    }
}

/// Lifecycle events forwarded by [`ChannelHandler`], in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Open { status: u16 },
    Message(StreamItem),
    Closed,
    Error(String),
}

/// Forwards every callback as a [`StreamEvent`] over a channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving half of its channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Turn the receiving half into a [`Stream`]
    pub fn into_stream(
        mut rx: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }

    fn send(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            trace!("stream event receiver dropped");
        }
    }
}

#[async_trait]
impl StreamHandler for ChannelHandler {
    async fn on_open(&mut self, head: &ResponseHead) -> Result<()> {
        self.send(StreamEvent::Open {
            status: head.status.as_u16(),
        });
        Ok(())
    }

    fn on_message(&mut self, item: StreamItem) {
        self.send(StreamEvent::Message(item));
    }

    fn on_close(&mut self) {
        self.send(StreamEvent::Closed);
    }

    fn on_error(&mut self, error: &AssistError) {
        self.send(StreamEvent::Error(error.to_string()));
    }
}
