//! Upstream client for the Responses API.
//!
//! Submits a job, renegotiates optional fields the provider rejects, and
//! hands asynchronous jobs to the [`poller::Poller`].

pub mod extract;
pub mod payload;
pub mod poller;
pub mod transport;


use std::sync::LazyLock;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;

use crate::capabilities::resolve;
use crate::config::UpstreamConfig;
use crate::dispatcher::{Job, TaskExecutor, TaskResult};
use crate::endpoints::Endpoints;
use crate::error::{truncate, ProxyError};

use extract::parse_envelope;
use payload::{combine_prompts, OptionalField, Payload};
use poller::{JobStatus, Poller};
use transport::{Transport, UpstreamRequest};

static UNSUPPORTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unsupported|not supported|does not support|unrecognized|unknown parameter")
        .unwrap()
});

static REJECTED_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(temperature)|(tool_choice|tools|web_search\w*))\b").unwrap()
});

#[derive(Deserialize)]
struct ProviderError {
    error: ProviderErrorDetail,
}

#[derive(Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Optional field a 400 body says the model does not accept.
pub fn rejected_field(body: &str) -> Option<OptionalField> {
    let (message, param) = match serde_json::from_str::<ProviderError>(body) {
        Ok(ProviderError { error }) => {
            let message = match error.code {
                Some(code) => format!("{} {}", error.message, code),
                None => error.message,
            };
            (message, error.param)
        }
        Err(_) => (body.to_string(), None),
    };

    if !UNSUPPORTED.is_match(&message) {
        return None;
    }

    let haystack = param.as_deref().unwrap_or(&message);
    let captures = REJECTED_FIELD
        .captures(haystack)
        .or_else(|| REJECTED_FIELD.captures(&message))?;
    if captures.get(1).is_some() {
        Some(OptionalField::Temperature)
    } else {
        Some(OptionalField::Tools)
    }
}

/// Sends jobs upstream. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Transport,
    endpoints: Endpoints,
    poller: Poller,
    max_output_tokens: u32,
    temperature: f32,
    poll_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(transport: Transport, endpoints: Endpoints, settings: &UpstreamConfig) -> Self {
        let poller = Poller::new(transport.clone(), endpoints.clone(), settings.poll_interval());
        Self {
            transport,
            endpoints,
            poller,
            max_output_tokens: settings.max_output_tokens,
            temperature: settings.temperature,
            poll_timeout: settings.poll_timeout(),
        }
    }

    /// Run `job` to completion and return the answer text.
    pub async fn submit(&self, job: &Job, deadline: Instant) -> Result<String, ProxyError> {
        let request_id = job.request_id;
        let mut payload = Payload::build(
            &job.model,
            combine_prompts(&job.system_prompt, &job.prompt),
            job.web_search,
            resolve(&job.model),
            self.max_output_tokens,
            self.temperature,
        );

        // Each optional field can be stripped once, so this ends after at
        // most OptionalField::ALL.len() extra calls.
        let response = loop {
            let request = UpstreamRequest::post_json(self.endpoints.responses_url(), &payload)?;
            let response = self.transport.execute(&request, deadline).await?;
            tracing::info!(
                %request_id,
                model = %job.model,
                status = response.status.as_u16(),
                latency_ms = response.latency.as_millis() as u64,
                "upstream submission answered"
            );

            if response.status != StatusCode::BAD_REQUEST {
                break response;
            }
            match rejected_field(&response.body) {
                Some(field) if payload.strip(field) => {
                    tracing::warn!(
                        %request_id,
                        model = %job.model,
                        field = field.name(),
                        "provider rejected optional field, resending without it"
                    );
                }
                _ => break response,
            }
        };

        if !response.status.is_success() {
            tracing::warn!(
                %request_id,
                status = response.status.as_u16(),
                body = truncate(&response.body),
                "upstream submission failed"
            );
            return Err(ProxyError::UpstreamApi {
                status: response.status.as_u16(),
                body: truncate(&response.body).to_string(),
            });
        }

        let envelope = parse_envelope(&response.body);
        if !envelope.text.trim().is_empty() {
            return Ok(envelope.text);
        }

        let Some(job_id) = envelope.id else {
            return Err(ProxyError::NoText);
        };
        let initial = JobStatus::parse(envelope.status.as_deref());
        tracing::debug!(%request_id, job_id, status = initial.as_str(), "polling for completion");

        let poll_deadline = (Instant::now() + self.poll_timeout).min(deadline);
        self.poller.wait(&job_id, initial, poll_deadline).await
    }
}

impl TaskExecutor for UpstreamClient {
    fn execute(&self, job: Job, deadline: Instant) -> BoxFuture<'static, TaskResult> {
        let client = self.clone();
        async move { client.submit(&job, deadline).await }.boxed()
    }
}
