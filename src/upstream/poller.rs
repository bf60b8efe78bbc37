//! Completion polling for asynchronous submissions.

use std::time::Duration;

use tokio::time::Instant;

use crate::endpoints::Endpoints;
use crate::error::ProxyError;
use crate::upstream::extract::parse_envelope;
use crate::upstream::transport::{is_retryable, Transport, UpstreamRequest};

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Queued,
    InProgress,
    Completed,
    Succeeded,
    Done,
    Cancelled,
    Failed,
    Errored,
    Incomplete,
    /// A status this proxy does not know; treated as still running.
    Other(String),
}

impl JobStatus {
    /// Missing statuses count as freshly submitted.
    pub fn parse(status: Option<&str>) -> Self {
        let Some(status) = status else {
            return Self::Submitted;
        };
        match status.trim().to_ascii_lowercase().as_str() {
            "" | "submitted" => Self::Submitted,
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "succeeded" => Self::Succeeded,
            "done" => Self::Done,
            "cancelled" | "canceled" => Self::Cancelled,
            "failed" => Self::Failed,
            "errored" | "error" => Self::Errored,
            "incomplete" => Self::Incomplete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Succeeded | Self::Done)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Errored | Self::Incomplete
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Succeeded => "succeeded",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Incomplete => "incomplete",
            Self::Other(status) => status,
        }
    }
}

/// Fetches a job until it settles or the poll deadline passes.
#[derive(Clone)]
pub struct Poller {
    transport: Transport,
    endpoints: Endpoints,
    interval: Duration,
}

impl Poller {
    pub fn new(transport: Transport, endpoints: Endpoints, interval: Duration) -> Self {
        Self {
            transport,
            endpoints,
            interval,
        }
    }

    /// Drive job `job_id` from `initial` to a terminal state.
    ///
    /// Sleeps are clipped to the deadline, so the call returns no later than
    /// one interval after `deadline`.
    pub async fn wait(
        &self,
        job_id: &str,
        initial: JobStatus,
        deadline: Instant,
    ) -> Result<String, ProxyError> {
        let mut status = initial;
        let mut text = String::new();
        let mut polls: u32 = 0;

        loop {
            // Text wins over status, as it does for the submission itself.
            if !text.trim().is_empty() {
                tracing::debug!(job_id, polls, status = status.as_str(), "job produced text");
                return Ok(text);
            }
            if status.is_success() {
                tracing::warn!(job_id, status = status.as_str(), "job finished without text");
                return Err(ProxyError::IncompleteResponse);
            }
            if status.is_failure() {
                tracing::warn!(job_id, status = status.as_str(), "job failed");
                return Err(ProxyError::FailedStatus(status.as_str().to_string()));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(job_id, polls, status = status.as_str(), "poll deadline reached");
                return Err(ProxyError::IncompleteResponse);
            }
            if polls > 0 {
                tokio::time::sleep(self.interval.min(remaining)).await;
            }
            polls += 1;

            let request = UpstreamRequest::get(self.endpoints.job_url(job_id));
            match self.transport.execute(&request, deadline).await {
                Ok(response) if response.status.is_success() => {
                    let envelope = parse_envelope(&response.body);
                    status = JobStatus::parse(envelope.status.as_deref());
                    text = envelope.text;
                }
                Ok(response) if is_retryable(response.status) => {
                    tracing::warn!(job_id, status = response.status.as_u16(), "poll error, will retry");
                }
                Ok(response) => {
                    return Err(ProxyError::UpstreamApi {
                        status: response.status.as_u16(),
                        body: response.body,
                    });
                }
                Err(ProxyError::Timeout) => {
                    tracing::warn!(job_id, polls, "poll deadline reached during fetch");
                    return Err(ProxyError::IncompleteResponse);
                }
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "poll error, will retry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::create_client;
    use crate::upstream::transport::RetryPolicy;

    fn poller_for(server: &mockito::Server, interval: Duration) -> Poller {
        let endpoints = Endpoints::new(
            &format!("{}/v1/responses", server.url()),
            &format!("{}/v1/models", server.url()),
        );
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        };
        Poller::new(Transport::new(create_client().unwrap(), "sk-test", policy), endpoints, interval)
    }

    #[test]
    fn parses_known_statuses() {
        assert_eq!(JobStatus::parse(None), JobStatus::Submitted);
        assert_eq!(JobStatus::parse(Some("queued")), JobStatus::Queued);
        assert_eq!(JobStatus::parse(Some("IN_PROGRESS")), JobStatus::InProgress);
        assert_eq!(JobStatus::parse(Some("canceled")), JobStatus::Cancelled);
        assert_eq!(JobStatus::parse(Some("paused")), JobStatus::Other("paused".to_string()));
    }

    #[test]
    fn classifies_terminal_states() {
        for status in ["completed", "succeeded", "done"] {
            assert!(JobStatus::parse(Some(status)).is_success(), "{status}");
        }
        for status in ["cancelled", "failed", "errored", "incomplete"] {
            assert!(JobStatus::parse(Some(status)).is_failure(), "{status}");
        }
        for status in ["submitted", "queued", "in_progress", "paused"] {
            assert!(!JobStatus::parse(Some(status)).is_terminal(), "{status}");
        }
    }

    #[tokio::test]
    async fn returns_text_once_job_completes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/responses/resp_1")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"id":"resp_1","status":"completed","output_text":"Done!"}"#)
            .expect(1)
            .create_async()
            .await;

        let text = poller_for(&server, Duration::from_millis(50))
            .wait("resp_1", JobStatus::Queued, Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Done!");
    }

    #[tokio::test]
    async fn failure_state_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/responses/resp_2")
            .with_status(200)
            .with_body(r#"{"id":"resp_2","status":"failed","error":{"message":"server_error"}}"#)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(50))
            .wait("resp_2", JobStatus::InProgress, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(ProxyError::FailedStatus("failed".to_string())));
    }

    #[tokio::test]
    async fn incomplete_job_with_partial_text_returns_it() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/responses/resp_8")
            .with_status(200)
            .with_body(r#"{"id":"resp_8","status":"incomplete","output_text":"partial answer"}"#)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(50))
            .wait("resp_8", JobStatus::InProgress, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(result, Ok("partial answer".to_string()));
    }

    #[tokio::test]
    async fn incomplete_job_without_text_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/responses/resp_9")
            .with_status(200)
            .with_body(r#"{"id":"resp_9","status":"incomplete","output":[]}"#)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(50))
            .wait("resp_9", JobStatus::InProgress, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(ProxyError::FailedStatus("incomplete".to_string())));
    }

    #[tokio::test]
    async fn completed_without_text_is_incomplete() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/responses/resp_3")
            .with_status(200)
            .with_body(r#"{"id":"resp_3","status":"completed","output":[]}"#)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(50))
            .wait("resp_3", JobStatus::Queued, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(ProxyError::IncompleteResponse));
    }

    #[tokio::test]
    async fn terminal_initial_state_skips_fetch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/responses/resp_4")
            .expect(0)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(50))
            .wait("resp_4", JobStatus::Cancelled, Instant::now() + Duration::from_secs(5))
            .await;

        mock.assert_async().await;
        assert_eq!(result, Err(ProxyError::FailedStatus("cancelled".to_string())));
    }

    #[tokio::test]
    async fn never_terminal_job_times_out_within_one_interval() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/responses/resp_5")
            .with_status(200)
            .with_body(r#"{"id":"resp_5","status":"in_progress"}"#)
            .create_async()
            .await;

        let interval = Duration::from_millis(200);
        let poll_timeout = Duration::from_millis(1000);
        let started = Instant::now();

        let result = poller_for(&server, interval)
            .wait("resp_5", JobStatus::Queued, started + poll_timeout)
            .await;

        assert_eq!(result, Err(ProxyError::IncompleteResponse));
        assert!(
            started.elapsed() <= poll_timeout + interval,
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn transient_fetch_errors_keep_polling() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/v1/responses/resp_6")
            .with_status(502)
            .expect_at_least(1)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(20))
            .wait("resp_6", JobStatus::Queued, Instant::now() + Duration::from_millis(300))
            .await;

        failing.assert_async().await;
        assert_eq!(result, Err(ProxyError::IncompleteResponse));
    }

    #[tokio::test]
    async fn missing_job_is_an_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/responses/resp_7")
            .with_status(404)
            .with_body(r#"{"error":{"message":"No response found"}}"#)
            .create_async()
            .await;

        let result = poller_for(&server, Duration::from_millis(20))
            .wait("resp_7", JobStatus::Queued, Instant::now() + Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(ProxyError::UpstreamApi { status: 404, .. })), "{result:?}");
    }
}
