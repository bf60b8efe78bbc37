//! Secret-gated HTTP surface of the proxy.
//!
//! Endpoints:
//! - GET /health - Health check (no secret required)
//! - GET /?prompt=...&model=...&web_search=...&format=... - Answer a prompt

mod handlers;
mod types;


use axum::{extract::Request, middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::capabilities::ModelCatalog;
use crate::config::Config;
use crate::dispatcher::{build_dispatcher, TaskQueue};
use crate::endpoints::Endpoints;
use crate::http::create_client;
use crate::upstream::transport::Transport;
use crate::upstream::UpstreamClient;

pub use handlers::{constant_time_eq, parse_flag};
pub use types::*;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: ModelCatalog,
    pub queue: TaskQueue,
    pub service_secret: Arc<str>,
    pub default_model: String,
    pub system_prompt: String,
    pub request_timeout: Duration,
    pub enqueue_wait: Duration,
}

impl AppState {
    /// State around an existing catalog and task queue.
    pub fn new(config: &Config, catalog: ModelCatalog, queue: TaskQueue) -> Self {
        Self {
            catalog,
            queue,
            service_secret: Arc::from(config.server.service_secret.as_str()),
            default_model: config.upstream.default_model.clone(),
            system_prompt: config.upstream.system_prompt.clone(),
            request_timeout: config.server.request_timeout(),
            enqueue_wait: config.server.enqueue_wait(),
        }
    }

    /// Wire up the upstream stack and start the workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let upstream = &config.upstream;
        let endpoints = Endpoints::new(&upstream.responses_url, &upstream.models_url);
        let transport = Transport::new(
            create_client()?,
            &upstream.provider_key,
            upstream.retry_policy(),
        );

        let catalog = ModelCatalog::new(transport.clone(), endpoints.clone(), upstream.catalog_ttl());
        let client = UpstreamClient::new(transport, endpoints, upstream);

        let (queue, dispatcher) = build_dispatcher(
            config.dispatcher.worker_count,
            config.dispatcher.queue_size,
        );
        dispatcher.start(Arc::new(client));

        Ok(Self::new(config, catalog, queue))
    }
}

/// Create the API router with the given state.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let gated = Router::new()
        .route("/", get(handlers::proxy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_secret,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(gated)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Path only: the query string may carry the service secret.
fn request_span(request: &Request) -> tracing::Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = request.uri().path(),
    )
}
