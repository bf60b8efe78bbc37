//! Cached catalog of model ids served by the provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Deserialize;
use tokio::time::Instant;

use crate::endpoints::Endpoints;
use crate::error::ProxyError;
use crate::upstream::transport::{Transport, UpstreamRequest};

const CATALOG_KEY: &str = "models";

/// Default lifetime of a fetched catalog.
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Budget of a catalog refresh, independent of the request that triggered it.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ModelListing {
    #[serde(default)]
    data: Vec<ListedModel>,
}

#[derive(Deserialize)]
struct ListedModel {
    id: String,
}

/// Known model ids, fetched from the model-listing endpoint and cached.
///
/// The whole id set lives under a single cache entry, so readers see either
/// the previous set or the new one. Concurrent misses share one fetch, which
/// runs on its own refresh budget; each caller only waits until its own
/// deadline.
#[derive(Clone)]
pub struct ModelCatalog {
    transport: Transport,
    endpoints: Endpoints,
    cache: Cache<&'static str, Arc<HashSet<String>>>,
}

impl ModelCatalog {
    pub fn new(transport: Transport, endpoints: Endpoints, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();

        Self {
            transport,
            endpoints,
            cache,
        }
    }

    /// Check that `model` is in the catalog, refreshing it first when it is
    /// expired or empty.
    pub async fn verify(&self, model: &str, deadline: Instant) -> Result<(), ProxyError> {
        let models = self.models(deadline).await?;
        if models.contains(&model.trim().to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(ProxyError::UnknownModel(model.to_string()))
        }
    }

    /// Current id set (lowercased).
    pub async fn models(&self, deadline: Instant) -> Result<Arc<HashSet<String>>, ProxyError> {
        let refresh_deadline = Instant::now() + REFRESH_TIMEOUT;
        let lookup = self
            .cache
            .try_get_with(CATALOG_KEY, self.fetch(refresh_deadline));

        let models = tokio::time::timeout_at(deadline, lookup)
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| match e.as_ref() {
                ProxyError::Timeout => ProxyError::Timeout,
                other => ProxyError::CatalogUnavailable(other.to_string()),
            })?;

        if models.is_empty() {
            // Never serve an empty catalog for a whole TTL.
            self.cache.invalidate(CATALOG_KEY).await;
        }
        Ok(models)
    }

    /// Drop the cached catalog so the next read refetches it.
    pub async fn invalidate(&self) {
        self.cache.invalidate(CATALOG_KEY).await;
    }

    async fn fetch(&self, deadline: Instant) -> Result<Arc<HashSet<String>>, ProxyError> {
        let request = UpstreamRequest::get(self.endpoints.models_url());
        let response = self.transport.execute(&request, deadline).await?;

        if !response.status.is_success() {
            tracing::warn!(status = response.status.as_u16(), "model catalog refresh rejected");
            return Err(ProxyError::UpstreamApi {
                status: response.status.as_u16(),
                body: response.body,
            });
        }

        let listing: ModelListing = serde_json::from_str(&response.body)
            .map_err(|e| ProxyError::Internal(format!("malformed model listing: {e}")))?;

        let models: HashSet<String> = listing
            .data
            .into_iter()
            .map(|m| m.id.to_ascii_lowercase())
            .collect();

        tracing::info!(
            count = models.len(),
            latency_ms = response.latency.as_millis() as u64,
            "model catalog refreshed"
        );
        Ok(Arc::new(models))
    }
}
