//! Deadline-bound HTTP execution with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{truncate, ProxyError};

/// Backoff settings for retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base × 2^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// An upstream call that can be replayed on retry.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    body: Option<Vec<u8>>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self, ProxyError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ProxyError::Internal(format!("failed to encode payload: {e}")))?;
        Ok(Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
        })
    }
}

/// Outcome of a call that produced an HTTP response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: String,
    /// Wall time across all attempts.
    pub latency: Duration,
}

/// Server errors and rate limiting are worth replaying; other 4xx are not.
pub fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Bearer-authenticated HTTP executor shared by every upstream component.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    api_key: Arc<str>,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(client: Client, api_key: &str, policy: RetryPolicy) -> Self {
        Self {
            client,
            api_key: Arc::from(api_key),
            policy,
        }
    }

    /// Execute `request`, retrying network failures, 5xx and 429 until the
    /// attempts run out or `deadline` passes.
    ///
    /// Exhausting attempts on a retryable status returns that last response;
    /// exhausting them on network failures returns `ProxyError::Transport`.
    /// Hitting the deadline always returns `ProxyError::Timeout`.
    pub async fn execute(
        &self,
        request: &UpstreamRequest,
        deadline: Instant,
    ) -> Result<UpstreamResponse, ProxyError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProxyError::Timeout);
            }

            attempt += 1;
            let last_attempt = attempt >= self.policy.max_attempts;

            let reason = match self.send_once(request, remaining).await {
                Ok((status, body)) => {
                    let response = UpstreamResponse {
                        status,
                        body,
                        latency: start.elapsed(),
                    };
                    if !is_retryable(status) || last_attempt {
                        tracing::debug!(
                            method = %request.method,
                            url = %request.url,
                            status = status.as_u16(),
                            latency_ms = response.latency.as_millis() as u64,
                            attempt,
                            "upstream call finished"
                        );
                        return Ok(response);
                    }
                    format!("status {}: {}", status.as_u16(), truncate(&response.body))
                }
                Err(e) if e.is_timeout() && Instant::now() >= deadline => {
                    return Err(ProxyError::Timeout);
                }
                Err(e) => {
                    if last_attempt {
                        return Err(ProxyError::Transport(e.to_string()));
                    }
                    e.to_string()
                }
            };

            let delay = self.policy.delay_for(attempt - 1);
            if Instant::now() + delay >= deadline {
                tracing::warn!(url = %request.url, attempt, %reason, "no time left to retry upstream call");
                return Err(ProxyError::Timeout);
            }

            tracing::warn!(
                url = %request.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .bearer_auth(&*self.api_key)
            .timeout(timeout);

        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::create_client;
    use mockito::Matcher;

    fn transport(policy: RetryPolicy) -> Transport {
        Transport::new(create_client().unwrap(), "sk-test", policy)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    fn deadline_in(duration: Duration) -> Instant {
        Instant::now() + duration
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn classifies_retryable_statuses() {
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::OK));
    }

    #[tokio::test]
    async fn sends_bearer_token_and_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/responses")
            .match_header("authorization", "Bearer sk-test")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({"model": "gpt-4.1"})))
            .with_status(200)
            .with_body(r#"{"output_text":"ok"}"#)
            .create_async()
            .await;

        let request = UpstreamRequest::post_json(
            format!("{}/v1/responses", server.url()),
            &serde_json::json!({"model": "gpt-4.1"}),
        )
        .unwrap();
        let response = transport(fast_policy(3))
            .execute(&request, deadline_in(Duration::from_secs(5)))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, r#"{"output_text":"ok"}"#);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/models")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let request = UpstreamRequest::get(format!("{}/v1/models", server.url()));
        let response = transport(fast_policy(4))
            .execute(&request, deadline_in(Duration::from_secs(5)))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn retries_server_errors_until_attempts_run_out() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/models")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let request = UpstreamRequest::get(format!("{}/v1/models", server.url()));
        let response = transport(fast_policy(3))
            .execute(&request, deadline_in(Duration::from_secs(5)))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn retries_rate_limits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/models")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let request = UpstreamRequest::get(format!("{}/v1/models", server.url()));
        let response = transport(fast_policy(2))
            .execute(&request, deadline_in(Duration::from_secs(5)))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn reports_timeout_when_backoff_would_pass_deadline() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/models")
            .with_status(500)
            .create_async()
            .await;

        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        let request = UpstreamRequest::get(format!("{}/v1/models", server.url()));
        let started = Instant::now();
        let result = transport(policy)
            .execute(&request, deadline_in(Duration::from_millis(200)))
            .await;

        assert_eq!(result.unwrap_err(), ProxyError::Timeout);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn expired_deadline_fails_without_calling() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/models")
            .expect(0)
            .create_async()
            .await;

        let request = UpstreamRequest::get(format!("{}/v1/models", server.url()));
        let result = transport(fast_policy(3)).execute(&request, Instant::now()).await;

        mock.assert_async().await;
        assert_eq!(result.unwrap_err(), ProxyError::Timeout);
    }

    #[tokio::test]
    async fn network_failure_surfaces_as_transport_error() {
        // Port 9 (discard) is closed on test hosts, so connecting fails fast.
        let request = UpstreamRequest::get("http://127.0.0.1:9/v1/models");
        let result = transport(fast_policy(2))
            .execute(&request, deadline_in(Duration::from_secs(5)))
            .await;

        assert!(matches!(result, Err(ProxyError::Transport(_))), "{result:?}");
    }
}
