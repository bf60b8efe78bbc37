//! HTTP handlers for the proxy API.

use super::types::*;
use super::AppState;
use crate::dispatcher::{Job, RequestTask};
use crate::error::ProxyError;
use crate::format::{render, OutputFormat};
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

// ============================================================================
// Health and auth
// ============================================================================

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        app: "promptgate",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Reject requests that do not carry the service secret.
pub async fn require_secret(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    match presented_secret(&request) {
        Some(secret) if constant_time_eq(&secret, &state.service_secret) => {
            Ok(next.run(request).await)
        }
        presented => {
            tracing::warn!(
                path = request.uri().path(),
                secret_present = presented.is_some(),
                "rejected unauthenticated request"
            );
            Err(ProxyError::Unauthorized)
        }
    }
}

/// Secret from `Authorization: Bearer`, `X-Api-Key`, or `?key=`, in that order.
fn presented_secret(request: &Request) -> Option<String> {
    let headers = request.headers();

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if let Some(secret) = bearer {
        return Some(secret.trim().to_string());
    }

    if let Some(secret) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        return Some(secret.trim().to_string());
    }

    Query::<SecretQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.key)
}

/// Compare without exiting at the first differing byte.
pub fn constant_time_eq(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

// ============================================================================
// Proxy handler
// ============================================================================

/// `GET /`: answer `prompt` through the worker pool.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let deadline = Instant::now() + state.request_timeout;
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    let accept = headers.get(header::ACCEPT).and_then(|value| value.to_str().ok());
    let format = OutputFormat::negotiate(query.format.as_deref(), accept);

    let result = answer(&state, query, format, request_id, deadline).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok((body, content_type)) => {
            tracing::info!(%request_id, elapsed_ms, "proxy request answered");
            Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
        }
        Err(e) => {
            tracing::warn!(
                %request_id,
                elapsed_ms,
                status = e.status_code().as_u16(),
                error = %e,
                "proxy request failed"
            );
            Err(e)
        }
    }
}

async fn answer(
    state: &AppState,
    query: ProxyQuery,
    format: OutputFormat,
    request_id: Uuid,
    deadline: Instant,
) -> Result<(String, &'static str), ProxyError> {
    let prompt = query
        .prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .ok_or(ProxyError::MissingPrompt)?;
    let model = query
        .model
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .unwrap_or_else(|| state.default_model.clone());
    let web_search = parse_flag(query.web_search.as_deref());

    tracing::info!(
        %request_id,
        model = %model,
        web_search,
        format = format.name(),
        "proxy request received"
    );

    state.catalog.verify(&model, deadline).await?;

    let job = Job {
        request_id,
        prompt: prompt.clone(),
        system_prompt: state.system_prompt.clone(),
        model,
        web_search,
    };
    let (task, reply) = RequestTask::new(job, deadline);

    let wait = state
        .enqueue_wait
        .min(deadline.saturating_duration_since(Instant::now()));
    state.queue.enqueue(task, wait).await?;

    // Dropping `reply` on timeout cancels the upstream work.
    let text = reply.wait(deadline).await?;

    render(&text, &prompt, format)
}

/// `1|true|yes` are true; `0|false|no` and empty are false. Anything else
/// is logged and treated as false.
pub fn parse_flag(value: Option<&str>) -> bool {
    let Some(raw) = value else {
        return false;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "" | "0" | "false" | "no" => false,
        _ => {
            tracing::warn!(value = raw, "unrecognized web_search flag, treating as false");
            false
        }
    }
}
