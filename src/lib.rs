//! assist-rs: HTTP and streaming core for AI assistant clients
//!
//! This library provides a cancellable HTTP client with a per-request
//! timeout, buffered and streaming response modes, an incremental
//! Server-Sent Events parser, and a client for backends that wrap their
//! answers in a `{code, msg, data}` envelope.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::too_many_lines)]

pub mod cli;
pub mod config;
pub mod error;
pub mod services;

// Re-exports for convenience
pub use error::{AssistError, Result};
