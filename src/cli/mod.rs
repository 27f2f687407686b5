//! CLI argument parsing and request building

use clap::{Args, Parser, Subcommand};
use reqwest::{multipart::Form, Method};

use crate::{
    error::{AssistError, Result},
    services::{http::RequestOptions, streaming::MessageType},
};

/// Assist: streaming HTTP client for AI assistant backends
#[derive(Debug, Parser)]
#[command(name = "assist")]
#[command(about = "Streaming HTTP client for AI assistant backends", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the configured base URL
    #[arg(long, global = true, env = "ASSIST_BASE_URL")]
    pub base_url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a request and print the response
    Fetch {
        /// Absolute URL, or a path relative to the base URL
        url: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Call a backend service path, unwrapping its response envelope
    Call {
        /// Path appended to the base URL
        path: String,

        #[command(flatten)]
        request: RequestArgs,

        /// Print the body without unwrapping the envelope
        #[arg(long)]
        raw: bool,
    },

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

/// Options shared by `fetch` and `call`
#[derive(Debug, Clone, Default, Args)]
pub struct RequestArgs {
    /// HTTP method
    #[arg(short = 'X', long)]
    pub method: Option<String>,

    /// Request header as `Name: value`
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Query parameter as `key=value`
    #[arg(short, long = "query", conflicts_with = "query_string")]
    pub query: Vec<String>,

    /// Already encoded query string
    #[arg(long)]
    pub query_string: Option<String>,

    /// JSON body
    #[arg(short, long, conflicts_with = "form")]
    pub data: Option<String>,

    /// Multipart form field as `key=value`
    #[arg(short = 'F', long)]
    pub form: Vec<String>,

    /// Timeout in milliseconds; `0` waits indefinitely
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Stream the response as Server-Sent Events
    #[arg(long, conflicts_with = "plain")]
    pub sse: bool,

    /// Stream the response as plain text
    #[arg(long)]
    pub plain: bool,

    /// Parse buffered JSON responses
    #[arg(long)]
    pub auto_parse: bool,
}

impl RequestArgs {
    /// Requested streaming mode, if any
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        if self.sse {
            Some(MessageType::Sse)
        } else if self.plain {
            Some(MessageType::PlainText)
        } else {
            None
        }
    }

    /// Build request options, leaving streaming to the caller
    ///
    /// # Errors
    ///
    /// Returns an error if a header, query pair, form field or JSON body is
    /// malformed
    pub fn to_options(&self) -> Result<RequestOptions> {
        let mut options = RequestOptions::new().auto_parse(self.auto_parse);

        if let Some(method) = &self.method {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|e| AssistError::InvalidInput(format!("method {method:?}: {e}")))?;
            options = options.method(method);
        }

        for header in &self.headers {
            let (name, value) = split_pair(header, ':')?;
            options = options.try_header(name, value)?;
        }

        if let Some(query) = &self.query_string {
            options = options.query_string(query.trim_start_matches('?'));
        }
        for pair in &self.query {
            let (key, value) = split_pair(pair, '=')?;
            options = options.query_param(key, value);
        }

        if let Some(data) = &self.data {
            let value: serde_json::Value = serde_json::from_str(data)?;
            options = options.json(&value)?;
        }
        if !self.form.is_empty() {
            let mut form = Form::new();
            for field in &self.form {
                let (key, value) = split_pair(field, '=')?;
                form = form.text(key.to_string(), value.to_string());
            }
            options = options.form(form);
        }

        if let Some(timeout) = self.timeout {
            options = options.timeout_ms(timeout);
        }

        Ok(options)
    }
}

fn split_pair(raw: &str, separator: char) -> Result<(&str, &str)> {
    raw.split_once(separator)
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| AssistError::InvalidInput(format!("expected `key{separator}value`, got {raw:?}")))
}

impl Cli {
    /// Parse CLI arguments from environment
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::http::Payload;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("assist").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fetch_options() {
        let cli = parse(&[
            "fetch",
            "/chat",
            "-X",
            "post",
            "-H",
            "Authorization: Bearer abc",
            "-q",
            "kb=docs",
            "-d",
            r#"{"q": "hi"}"#,
            "--timeout",
            "0",
            "--sse",
        ]);
        let Some(Commands::Fetch { url, request }) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(url, "/chat");
        assert_eq!(request.message_type(), Some(MessageType::Sse));

        let options = request.to_options().unwrap();
        assert_eq!(options.method, Some(Method::POST));
        assert_eq!(options.headers["authorization"], "Bearer abc");
        assert_eq!(options.timeout, Some(Duration::ZERO));
        assert!(matches!(options.data, Some(Payload::Json(_))));
        assert_eq!(options.query.unwrap().encode(), "kb=docs");
    }

    #[test]
    fn test_call_raw_flag() {
        let cli = parse(&["call", "/kb/list", "--raw", "--plain"]);
        let Some(Commands::Call { path, request, raw }) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(path, "/kb/list");
        assert!(raw);
        assert_eq!(request.message_type(), Some(MessageType::PlainText));
    }

    #[test]
    fn test_sse_and_plain_conflict() {
        let result = Cli::try_parse_from(["assist", "fetch", "/x", "--sse", "--plain"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_pairs() {
        let args = RequestArgs {
            headers: vec!["no-colon".to_string()],
            ..RequestArgs::default()
        };
        assert!(matches!(
            args.to_options().unwrap_err(),
            AssistError::InvalidInput(_)
        ));

        let args = RequestArgs {
            data: Some("{broken".to_string()),
            ..RequestArgs::default()
        };
        assert!(matches!(args.to_options().unwrap_err(), AssistError::Json(_)));
    }
}
