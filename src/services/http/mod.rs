//! Cancellable HTTP client with buffered and streaming modes
//!
//! [`FetchClient::execute`] normalizes a [`RequestOptions`], dispatches it and
//! returns a [`CancellableOperation`]. Without a streaming configuration the
//! response is returned as-is (or parsed as JSON on request); with one, the
//! body is decoded as SSE messages or plain text and handed to the
//! [`StreamHandler`] as it arrives.

pub mod abort;
pub mod handler;
pub mod operation;
pub mod request;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, StatusCode,
};
use serde_json::Value;
use tracing::{debug, trace, warn, Instrument};
use uuid::Uuid;

pub use self::{
    abort::{AbortController, AbortReason, AbortSignal, DEFAULT_CANCEL_REASON},
    handler::{handler_fn, ChannelHandler, FnHandler, ResponseHead, StreamEvent, StreamHandler},
    operation::{CancellableOperation, Canceller},
    request::{
        form_from_json, Body, Payload, PreparedRequest, Query, RequestOptions, StreamOptions,
        EVENT_STREAM_CONTENT_TYPE, JSON_CONTENT_TYPE, LAST_EVENT_ID,
    },
};
use crate::{
    config::Config,
    error::{AssistError, Result},
    services::streaming::{
        MessageSink, MessageType, SseMessage, SseParser, StreamItem, StreamState,
        Utf8StreamDecoder,
    },
};

/// Outcome of a completed request
#[derive(Debug)]
pub enum FetchOutput {
    /// Buffered response parsed as JSON (`auto_parse` with a JSON content type)
    Json(Value),

    /// Buffered response, body not read
    Response(reqwest::Response),

    /// Streaming response whose body was fully delivered to the handler
    Streamed(StreamSummary),
}

impl FetchOutput {
    /// The parsed JSON value, if any
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The raw response, if the body was left unread
    #[must_use]
    pub fn into_response(self) -> Option<reqwest::Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    /// The stream summary, if the response was streamed
    #[must_use]
    pub fn into_streamed(self) -> Option<StreamSummary> {
        match self {
            Self::Streamed(summary) => Some(summary),
            _ => None,
        }
    }
}

/// What remains of a streaming response once its body is consumed
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Response status and headers
    pub head: ResponseHead,

    /// Headers the request was sent with, `Last-Event-Id` updated from the
    /// stream; reuse them to resume
    pub request_headers: HeaderMap,

    /// Last event id and retry interval seen in the stream
    pub state: StreamState,
}

/// HTTP client shared by all calls.
///
/// Holds process-wide settings (base URL, default headers, default timeout)
/// that are read-only once built. Each call gets its own abort controller,
/// timer and parser state.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    inner: Arc<ClientSettings>,
}

#[derive(Debug)]
struct ClientSettings {
    base_url: Option<String>,
    default_timeout: Duration,
}

impl FetchClient {
    /// Build a client from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut builder = Client::builder().default_headers(config.header_map()?);
        if let Some(proxy) = &config.settings.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            inner: Arc::new(ClientSettings {
                base_url: config.settings.base_url.clone(),
                default_timeout: config.request_timeout(),
            }),
        })
    }

    /// Wrap an existing [`reqwest::Client`]
    #[must_use]
    pub fn with_client(client: Client, default_timeout: Duration) -> Self {
        Self {
            client,
            inner: Arc::new(ClientSettings {
                base_url: None,
                default_timeout,
            }),
        }
    }

    /// Prefix relative URLs with the configured base URL
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> String {
        match &self.inner.base_url {
            Some(base) if !url.starts_with("http://") && !url.starts_with("https://") => {
                format!("{}{url}", base.trim_end_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    /// Issue a request.
    ///
    /// Must be called within a Tokio runtime; the request runs on a spawned
    /// task and makes progress whether or not the operation is awaited.
    pub fn execute(&self, url: &str, mut options: RequestOptions) -> CancellableOperation<FetchOutput> {
        let controller = AbortController::new();
        let signal = options.signal.take();
        let client = self.client.clone();
        let url = self.resolve_url(url);
        let timeout = options.timeout.unwrap_or(self.inner.default_timeout);
        let span = tracing::debug_span!("fetch", request_id = %Uuid::new_v4(), %url);

        let inner = controller.clone();
        CancellableOperation::spawn(
            controller,
            async move {
                operation::guard(&inner, signal, dispatch(&client, &url, options, timeout, &inner))
                    .await
                    .inspect_err(|err| debug!(error = %err, "request failed"))
            }
            .instrument(span),
        )
    }
}

async fn dispatch(
    client: &Client,
    url: &str,
    mut options: RequestOptions,
    timeout: Duration,
    controller: &AbortController,
) -> Result<FetchOutput> {
    let stream = options.stream.take();
    let auto_parse = options.auto_parse;
    let prepared = options.prepare(url, stream.is_some());
    let request_headers = prepared.headers.clone();

    debug!(method = %prepared.method, url = %prepared.url, "dispatching request");
    let response = send(prepared.into_builder(client), timeout, controller).await?;
    debug!(status = %response.status(), "response received");

    match stream {
        None => buffered(response, auto_parse).await,
        Some(stream) => streamed(response, stream, request_headers, controller)
            .await
            .map(FetchOutput::Streamed),
    }
}

/// Send the request; the timer only runs until the response head arrives
async fn send(
    builder: reqwest::RequestBuilder,
    timeout: Duration,
    controller: &AbortController,
) -> Result<reqwest::Response> {
    if timeout.is_zero() {
        return Ok(builder.send().await?);
    }

    match tokio::time::timeout(timeout, builder.send()).await {
        Ok(response) => Ok(response?),
        Err(_) => {
            let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            controller.abort(AbortReason::Timeout(ms));
            debug!(timeout_ms = ms, "request timed out");
            Err(AssistError::Aborted(
                controller.reason().unwrap_or(AbortReason::Timeout(ms)),
            ))
        }
    }
}

async fn buffered(response: reqwest::Response, auto_parse: bool) -> Result<FetchOutput> {
    if auto_parse && media_type(response.headers()).as_deref() == Some(JSON_CONTENT_TYPE) {
        let bytes = response.bytes().await?;
        let value = serde_json::from_slice::<Value>(&bytes)?;
        return Ok(FetchOutput::Json(value));
    }
    Ok(FetchOutput::Response(response))
}

async fn streamed(
    response: reqwest::Response,
    stream: StreamOptions,
    mut request_headers: HeaderMap,
    controller: &AbortController,
) -> Result<StreamSummary> {
    let StreamOptions {
        message_type,
        mut handler,
    } = stream;
    let message_type = message_type.unwrap_or_default();
    let head = ResponseHead::from(&response);

    check_stream_head(&head, message_type)?;

    let outcome = async {
        handler.on_open(&head).await?;
        debug!(?message_type, "stream opened");
        drive_stream(
            response.bytes_stream(),
            message_type,
            handler.as_mut(),
            &mut request_headers,
            controller,
        )
        .await
    }
    .await;

    match outcome {
        Ok(state) => {
            debug!("stream closed");
            handler.on_close();
            Ok(StreamSummary {
                head,
                request_headers,
                state,
            })
        }
        Err(_) if controller.is_aborted() => {
            Err(AssistError::Aborted(controller.reason().unwrap_or_default()))
        }
        Err(err) => {
            warn!(error = %err, "stream failed");
            handler.on_error(&err);
            Err(err)
        }
    }
}

/// Reject a streaming response that is not a 200, or an SSE response whose
/// content type is not `text/event-stream`
pub fn check_stream_head(head: &ResponseHead, message_type: MessageType) -> Result<()> {
    if head.status != StatusCode::OK {
        return Err(AssistError::Status {
            status: head.status.as_u16(),
            reason: head.status.canonical_reason().map(str::to_string),
        });
    }

    if message_type == MessageType::Sse
        && media_type(&head.headers).as_deref() != Some(EVENT_STREAM_CONTENT_TYPE)
    {
        return Err(AssistError::ContentType {
            expected: EVENT_STREAM_CONTENT_TYPE,
            actual: head
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }

    Ok(())
}

/// Lower-cased media type of the `Content-Type` header, parameters stripped
fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next().unwrap_or_default().trim();
    Some(essence.to_ascii_lowercase())
}

/// Delivers parsed messages to the handler and tracks `Last-Event-Id`
struct HandlerSink<'a> {
    handler: &'a mut dyn StreamHandler,
    request_headers: &'a mut HeaderMap,
}

impl MessageSink for HandlerSink<'_> {
    fn on_message(&mut self, message: SseMessage) {
        self.handler.on_message(StreamItem::Event(message));
    }

    fn on_id(&mut self, id: &str) {
        let name = HeaderName::from_static(LAST_EVENT_ID);
        if id.is_empty() {
            self.request_headers.remove(name);
            return;
        }
        match HeaderValue::from_str(id) {
            Ok(value) => {
                self.request_headers.insert(name, value);
            }
            Err(_) => {
                warn!(id, "event id is not a valid header value");
                self.request_headers.remove(name);
            }
        }
    }

    fn on_retry(&mut self, retry: u64) {
        trace!(retry_ms = retry, "server announced retry interval");
    }
}

/// Read `body` to the end, decoding it as `message_type` into `handler`.
///
/// Every read also waits on `controller`; once aborted, the body is dropped
/// and the abort reason is returned. Works with any chunked byte stream, not
/// only `reqwest` bodies.
///
/// # Errors
///
/// Returns the abort reason if `controller` is aborted, or the body's
/// transport error
pub async fn drive_stream<S, E>(
    body: S,
    message_type: MessageType,
    handler: &mut dyn StreamHandler,
    request_headers: &mut HeaderMap,
    controller: &AbortController,
) -> Result<StreamState>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<AssistError>,
{
    let mut body = Box::pin(body);
    let mut parser = SseParser::new();
    let mut decoder = Utf8StreamDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            reason = controller.aborted() => return Err(AssistError::Aborted(reason)),
            next = body.next() => next,
        };

        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(Into::into)?;
        trace!(bytes = chunk.len(), "chunk received");

        match message_type {
            MessageType::Sse => {
                let mut sink = HandlerSink {
                    handler: &mut *handler,
                    request_headers: &mut *request_headers,
                };
                parser.feed(chunk, &mut sink);
            }
            MessageType::PlainText => {
                let text = decoder.decode(&chunk);
                if !text.is_empty() {
                    handler.on_message(StreamItem::Text(text));
                }
            }
        }
    }

    if message_type == MessageType::PlainText {
        let rest = decoder.finish();
        if !rest.is_empty() {
            handler.on_message(StreamItem::Text(rest));
        }
    }

    Ok(parser.state().clone())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::stream;
    use pretty_assertions::assert_eq;

    use super::*;

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Chunk> {
        let items: Vec<Chunk> = parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect();
        stream::iter(items)
    }

    fn collector() -> (Arc<Mutex<Vec<StreamItem>>>, impl StreamHandler + 'static) {
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&items);
        (items, handler_fn(move |item| sink.lock().unwrap().push(item)))
    }

    #[tokio::test]
    async fn test_sse_field_split_across_chunks() {
        let (items, mut handler) = collector();
        let mut headers = HeaderMap::new();

        drive_stream(
            chunks(&[b"data: {\"a\":1}", b"}\n\n"]),
            MessageType::Sse,
            &mut handler,
            &mut headers,
            &AbortController::new(),
        )
        .await
        .unwrap();

        let items = items.lock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text(), "{\"a\":1}}");
    }

    #[tokio::test]
    async fn test_last_event_id_header_tracks_ids() {
        let (_items, mut handler) = collector();
        let mut headers = HeaderMap::new();
        let controller = AbortController::new();

        let state = drive_stream(
            chunks(&[b"id: 7\ndata: a\n\n"]),
            MessageType::Sse,
            &mut handler,
            &mut headers,
            &controller,
        )
        .await
        .unwrap();
        assert_eq!(headers[LAST_EVENT_ID], "7");
        assert_eq!(state.last_event_id.as_deref(), Some("7"));

        let state = drive_stream(
            chunks(&[b"id:\ndata: b\n\n"]),
            MessageType::Sse,
            &mut handler,
            &mut headers,
            &controller,
        )
        .await
        .unwrap();
        assert!(headers.get(LAST_EVENT_ID).is_none());
        assert_eq!(state.last_event_id, None);
    }

    #[tokio::test]
    async fn test_retry_recorded_in_state() {
        let (_items, mut handler) = collector();
        let state = drive_stream(
            chunks(&[b"retry: 500\n\n", b"retry: abc\n\n"]),
            MessageType::Sse,
            &mut handler,
            &mut HeaderMap::new(),
            &AbortController::new(),
        )
        .await
        .unwrap();
        assert_eq!(state.retry, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_plain_text_passes_chunks_through() {
        let (items, mut handler) = collector();

        drive_stream(
            chunks(&[b"data: not parsed\n", b"\xe4\xbb", b"\xa3"]),
            MessageType::PlainText,
            &mut handler,
            &mut HeaderMap::new(),
            &AbortController::new(),
        )
        .await
        .unwrap();

        let items = items.lock().unwrap();
        assert_eq!(
            *items,
            vec![
                StreamItem::Text("data: not parsed\n".into()),
                StreamItem::Text("代".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_wins_over_transport_error() {
        let controller = AbortController::new();
        let aborter = controller.clone();
        let mut handler = handler_fn(move |_| {
            aborter.abort(AbortReason::Timeout(20));
        });
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: x\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let err = drive_stream(
            body,
            MessageType::Sse,
            &mut handler,
            &mut HeaderMap::new(),
            &controller,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "timeout of 20ms");
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let (_items, mut handler) = collector();
        let body = stream::iter(vec![Err::<Bytes, _>(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ))]);

        let err = drive_stream(
            body,
            MessageType::Sse,
            &mut handler,
            &mut HeaderMap::new(),
            &AbortController::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AssistError::Io(_)));
    }

    fn head(status: StatusCode, content_type: Option<&'static str>) -> ResponseHead {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        ResponseHead {
            status,
            headers,
            url: "http://localhost/".to_string(),
        }
    }

    #[test]
    fn test_check_stream_head_accepts_event_stream() {
        check_stream_head(
            &head(StatusCode::OK, Some("text/event-stream; charset=utf-8")),
            MessageType::Sse,
        )
        .unwrap();
    }

    // Rejects a missing or different content type; accepting only those
    // would invert the check.
    #[test]
    fn test_check_stream_head_rejects_wrong_content_type() {
        let err = check_stream_head(&head(StatusCode::OK, Some("application/json")), MessageType::Sse)
            .unwrap_err();
        assert!(matches!(err, AssistError::ContentType { .. }));

        let err = check_stream_head(&head(StatusCode::OK, None), MessageType::Sse).unwrap_err();
        assert!(matches!(err, AssistError::ContentType { actual: None, .. }));
    }

    #[test]
    fn test_check_stream_head_plain_text_ignores_content_type() {
        check_stream_head(&head(StatusCode::OK, Some("text/plain")), MessageType::PlainText).unwrap();
    }

    #[test]
    fn test_check_stream_head_rejects_non_200() {
        let err = check_stream_head(&head(StatusCode::CREATED, None), MessageType::PlainText)
            .unwrap_err();
        assert_eq!(err.to_string(), "Server responded with 201 Created");
    }

    #[test]
    fn test_resolve_url() {
        let client = FetchClient {
            client: Client::new(),
            inner: Arc::new(ClientSettings {
                base_url: Some("http://10.0.0.1:7861/".to_string()),
                default_timeout: Duration::ZERO,
            }),
        };
        assert_eq!(client.resolve_url("/chat/chat"), "http://10.0.0.1:7861/chat/chat");
        assert_eq!(client.resolve_url("https://example.com/x"), "https://example.com/x");
    }
}
