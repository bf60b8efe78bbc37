//! Request and response types for the proxy API.

use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub app: &'static str,
    pub version: &'static str,
}

/// Query parameters of `GET /`.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub web_search: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// The service secret may also travel as `?key=`.
#[derive(Debug, Default, Deserialize)]
pub struct SecretQuery {
    #[serde(default)]
    pub key: Option<String>,
}
