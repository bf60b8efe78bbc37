//! Shared HTTP client factory.
//!
//! The client carries no overall timeout: every upstream call is bounded by the
//! deadline of the request that issued it.

use reqwest::Client;
use std::time::Duration;

/// Time allowed to establish a connection to the provider.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an idle pooled connection is kept.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Create the upstream HTTP client.
pub fn create_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .user_agent(concat!("promptgate/", env!("CARGO_PKG_VERSION")))
        .build()
}
