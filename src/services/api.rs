//! Client for assistant backend services
//!
//! Wraps [`FetchClient`] for backends that answer with a
//! `{"code": .., "msg": .., "data": ..}` envelope. Calls get the service
//! timeout, streaming defaults to SSE, and every failure other than an explicit
//! cancel is reported as [`AssistError::Busy`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, Instrument};

use super::{
    http::{
        operation, AbortController, AbortReason, CancellableOperation, FetchClient, FetchOutput,
        RequestOptions, StreamSummary, DEFAULT_CANCEL_REASON,
    },
    streaming::MessageType,
};
use crate::{
    config::Config,
    error::{AssistError, Result},
};

/// Result of a service call
#[derive(Debug)]
pub enum ServiceReply {
    /// Streamed response; messages went to the handler
    Streamed(StreamSummary),

    /// Decoded (and unless raw, unwrapped) response body
    Data(Value),
}

impl ServiceReply {
    /// Deserialize the data of a buffered reply
    ///
    /// # Errors
    ///
    /// Returns an error if the reply was streamed or the data does not match `T`
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Data(value) => Ok(serde_json::from_value(value)?),
            Self::Streamed(_) => Err(AssistError::InvalidInput(
                "streamed reply carries no data".to_string(),
            )),
        }
    }
}

/// Client bound to one backend base URL
#[derive(Debug, Clone)]
pub struct ServiceClient {
    fetch: FetchClient,
    base_url: String,
    timeout: Duration,
}

impl ServiceClient {
    /// Create a client for `base_url`
    pub fn new(fetch: FetchClient, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            fetch,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL is configured or the HTTP client
    /// cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.settings.base_url.clone().ok_or_else(|| {
            AssistError::ConfigValidation("base_url is required for service calls".to_string())
        })?;
        Ok(Self::new(
            FetchClient::new(config)?,
            base_url,
            config.service_timeout(),
        ))
    }

    /// Call `path`, unwrapping the response envelope
    pub fn call(&self, path: &str, options: RequestOptions) -> CancellableOperation<ServiceReply> {
        self.request(path, options, false)
    }

    /// Call `path`, returning the decoded body as-is
    pub fn call_raw(&self, path: &str, options: RequestOptions) -> CancellableOperation<ServiceReply> {
        self.request(path, options, true)
    }

    fn request(
        &self,
        path: &str,
        mut options: RequestOptions,
        raw: bool,
    ) -> CancellableOperation<ServiceReply> {
        let controller = AbortController::new();
        let caller = options.signal.replace(controller.signal());

        if let Some(stream) = options.stream.as_mut() {
            stream.message_type.get_or_insert(MessageType::Sse);
        }
        options.timeout = Some(self.timeout);
        options.auto_parse = false;

        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let span = tracing::debug_span!("service", %path);
        let pending = self.fetch.execute(&url, options);

        let inner = controller.clone();
        CancellableOperation::spawn(
            controller,
            async move {
                let work = async {
                    match pending.await? {
                        FetchOutput::Streamed(summary) => Ok(ServiceReply::Streamed(summary)),
                        FetchOutput::Json(value) => Ok(ServiceReply::Data(unwrap_envelope(value, raw)?)),
                        FetchOutput::Response(response) => {
                            let value = read_body(response).await?;
                            Ok(ServiceReply::Data(unwrap_envelope(value, raw)?))
                        }
                    }
                };
                operation::guard(&inner, caller, work).await.map_err(into_busy)
            }
            .instrument(span),
        )
    }
}

/// Decode a buffered body as JSON, falling back to a JSON string
async fn read_body(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if status.as_u16() != 200 {
        return Err(AssistError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
        });
    }

    let text = response.text().await?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Unwrap `{code, msg, data}`.
///
/// A code other than `0` or `200` is an error. Non-object bodies pass
/// through unchanged.
fn unwrap_envelope(value: Value, raw: bool) -> Result<Value> {
    if raw {
        return Ok(value);
    }

    let Value::Object(mut object) = value else {
        return Ok(value);
    };

    if let Some(code) = object.get("code").and_then(envelope_code) {
        if code != 0 && code != 200 {
            let message = object
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(AssistError::Api { code, message });
        }
    }

    Ok(object.remove("data").unwrap_or(Value::Null))
}

fn envelope_code(code: &Value) -> Option<i64> {
    match code {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Report anything but an explicit cancel as "busy"
fn into_busy(err: AssistError) -> AssistError {
    match &err {
        AssistError::Aborted(AbortReason::Cancelled(reason)) if reason == DEFAULT_CANCEL_REASON => {
            err
        }
        _ => {
            debug!(error = %err, "service call failed");
            AssistError::Busy {
                source: Box::new(err),
            }
        }
    }
}
