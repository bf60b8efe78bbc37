//! promptgate - secret-gated proxy for the OpenAI Responses API.
//!
//! Features:
//! - Single `GET /` endpoint answering a prompt in JSON, XML, CSV or plain text
//! - Bounded worker pool with fast rejection when saturated
//! - Per-model capability table with adaptive retry for rejected fields
//! - Completion polling for asynchronous responses

pub mod api;
pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod format;
pub mod http;
pub mod upstream;
