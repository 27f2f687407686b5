//! Request options and their normalization before dispatch

use std::{fmt, time::Duration};

use bytes::Bytes;
use indexmap::IndexMap;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    multipart::Form,
    Method,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{abort::AbortSignal, handler::StreamHandler};
use crate::{
    error::{AssistError, Result},
    services::streaming::MessageType,
};

/// Media type of event streams
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Media type of JSON bodies
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Request header replayed to resume a stream
pub const LAST_EVENT_ID: &str = "last-event-id";

/// Explicit request body, sent as given
pub enum Body {
    Bytes(Bytes),
    Form(Form),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Form(form) => f.debug_tuple("Form").field(&form.boundary()).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Bytes(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<Form> for Body {
    fn from(form: Form) -> Self {
        Self::Form(form)
    }
}

/// Payload turned into a body for POST requests
pub enum Payload {
    /// Serialized as JSON with `Content-Type: application/json`
    Json(Value),

    /// Sent as multipart; the boundary header is left to the transport
    Form(Form),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Form(form) => f.debug_tuple("Form").field(&form.boundary()).finish(),
        }
    }
}

/// Query parameters appended to the URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Already encoded, used verbatim
    Encoded(String),

    /// Form-urlencoded in insertion order
    Pairs(IndexMap<String, String>),
}

impl Query {
    /// Encoded form, without the leading `?`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Encoded(query) => query.clone(),
            Self::Pairs(pairs) => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish(),
        }
    }
}

/// Streaming configuration: decode strategy plus lifecycle callbacks
pub struct StreamOptions {
    /// Decode strategy; plain text when unset
    pub message_type: Option<MessageType>,

    pub handler: Box<dyn StreamHandler>,
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

/// Configuration of one HTTP call
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// HTTP method, `GET` when unset
    pub method: Option<Method>,

    pub headers: HeaderMap,

    pub query: Option<Query>,

    /// Explicit body; wins over `data`
    pub body: Option<Body>,

    /// Payload converted into the body of a POST
    pub data: Option<Payload>,

    /// `None` uses the client default; zero waits indefinitely
    pub timeout: Option<Duration>,

    /// Parse JSON responses in buffered mode
    pub auto_parse: bool,

    /// Streaming configuration; buffered mode when unset
    pub stream: Option<StreamOptions>,

    /// Caller-owned abort signal linked into the request
    pub signal: Option<AbortSignal>,
}

impl RequestOptions {
    /// Options for a GET request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a POST request
    #[must_use]
    pub fn post() -> Self {
        Self::new().method(Method::POST)
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from strings
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not a valid header token
    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AssistError::InvalidInput(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AssistError::InvalidInput(format!("header value {value:?}: {e}")))?;
        Ok(self.header(name, value))
    }

    /// Use an already encoded query string
    #[must_use]
    pub fn query_string(mut self, query: impl Into<String>) -> Self {
        self.query = Some(Query::Encoded(query.into()));
        self
    }

    /// Add one query parameter
    #[must_use]
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.query {
            Some(Query::Pairs(pairs)) => {
                pairs.insert(key.into(), value.into());
            }
            _ => {
                self.query = Some(Query::Pairs(IndexMap::from([(key.into(), value.into())])));
            }
        }
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON payload
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be represented as JSON
    pub fn json<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        self.data = Some(Payload::Json(serde_json::to_value(data)?));
        Ok(self)
    }

    /// Multipart payload
    #[must_use]
    pub fn form(mut self, form: Form) -> Self {
        self.data = Some(Payload::Form(form));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Timeout in milliseconds; `0` waits indefinitely
    #[must_use]
    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    /// Wait indefinitely
    #[must_use]
    pub fn no_timeout(self) -> Self {
        self.timeout(Duration::ZERO)
    }

    #[must_use]
    pub fn auto_parse(mut self, auto_parse: bool) -> Self {
        self.auto_parse = auto_parse;
        self
    }

    /// Stream the response into `handler`
    #[must_use]
    pub fn stream(mut self, handler: impl StreamHandler + 'static) -> Self {
        self.stream = Some(StreamOptions {
            message_type: None,
            handler: Box::new(handler),
        });
        self
    }

    /// Stream the response into `handler`, decoded as `message_type`
    #[must_use]
    pub fn stream_as(mut self, message_type: MessageType, handler: impl StreamHandler + 'static) -> Self {
        self.stream = Some(StreamOptions {
            message_type: Some(message_type),
            handler: Box::new(handler),
        });
        self
    }

    /// Link a caller-owned abort signal
    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Normalize into a request ready for dispatch.
    ///
    /// Resolves the method, turns `data` into the body of a POST, encodes the
    /// query into `url` and sets the content negotiation headers. `data` and
    /// `query` are consumed so they are never sent twice.
    pub(crate) fn prepare(&mut self, url: &str, streaming: bool) -> PreparedRequest {
        let method = self.method.clone().unwrap_or(Method::GET);
        let mut headers = std::mem::take(&mut self.headers);
        let data = self.data.take();
        let mut body = self.body.take();

        if method == Method::POST {
            if body.is_none() {
                match data {
                    Some(Payload::Form(form)) => {
                        headers.remove(CONTENT_TYPE);
                        body = Some(Body::Form(form));
                    }
                    Some(Payload::Json(value)) => {
                        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
                        body = Some(Body::Bytes(Bytes::from(value.to_string())));
                    }
                    None => {
                        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
                    }
                }
            } else if data.is_some() {
                debug!("explicit body given, ignoring data payload");
            }
        } else {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(JSON_CONTENT_TYPE));
            if data.is_some() {
                debug!(%method, "data payload is only sent with POST, ignoring it");
            }
        }

        let mut url = url.to_string();
        if let Some(query) = self.query.take() {
            let query = query.encode();
            if !query.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&query);
            }
        }

        if streaming {
            headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
        }

        PreparedRequest {
            method,
            url,
            headers,
            body,
        }
    }
}

/// A normalized request
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl PreparedRequest {
    pub(crate) fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client.request(self.method, self.url).headers(self.headers);
        match self.body {
            Some(Body::Bytes(bytes)) => builder.body(bytes),
            Some(Body::Form(form)) => builder.multipart(form),
            None => builder,
        }
    }
}

/// Build a multipart form from a JSON object.
///
/// Arrays add one part per item; `null` and empty strings are skipped.
#[must_use]
pub fn form_from_json(object: &serde_json::Map<String, Value>) -> Form {
    fn text(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    let mut form = Form::new();
    for (key, value) in object {
        match value {
            Value::Array(items) => {
                for item in items.iter().filter_map(text) {
                    form = form.text(key.clone(), item);
                }
            }
            other => {
                if let Some(text) = text(other) {
                    form = form.text(key.clone(), text);
                }
            }
        }
    }
    form
}
