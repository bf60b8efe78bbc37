//! Registry of the two upstream URLs.
//!
//! Handles are cheap to clone and share one set of values, so a change made
//! through any handle is seen by the next upstream call on every other.

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{DEFAULT_MODELS_URL, DEFAULT_RESPONSES_URL};

#[derive(Debug, Clone, PartialEq, Eq)]
struct EndpointUrls {
    responses: String,
    models: String,
}

/// Shared, mutable upstream endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    urls: Arc<RwLock<EndpointUrls>>,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSES_URL, DEFAULT_MODELS_URL)
    }
}

impl Endpoints {
    pub fn new(responses_url: &str, models_url: &str) -> Self {
        Self {
            urls: Arc::new(RwLock::new(EndpointUrls {
                responses: responses_url.trim_end_matches('/').to_string(),
                models: models_url.to_string(),
            })),
        }
    }

    /// Submission endpoint.
    pub fn responses_url(&self) -> String {
        self.urls.read().unwrap_or_else(PoisonError::into_inner).responses.clone()
    }

    /// Model-listing endpoint.
    pub fn models_url(&self) -> String {
        self.urls.read().unwrap_or_else(PoisonError::into_inner).models.clone()
    }

    /// Poll URL for a submitted job.
    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.responses_url(), job_id)
    }

    pub fn set_responses_url(&self, url: &str) {
        let mut urls = self.urls.write().unwrap_or_else(PoisonError::into_inner);
        urls.responses = url.trim_end_matches('/').to_string();
    }

    pub fn set_models_url(&self, url: &str) {
        let mut urls = self.urls.write().unwrap_or_else(PoisonError::into_inner);
        urls.models = url.to_string();
    }
}
