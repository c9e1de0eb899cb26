//! Outbound API fetch
//!
//! Scheduled-job triggers pull from remote endpoints through this
//! abstraction. A `None` return is a fetch failure distinct from a
//! transport error: the endpoint answered but had nothing usable.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use pdi_common::{PdiError, Result};

/// Default outbound request timeout.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ApiFetcher: Send + Sync {
    /// Fetch the endpoint body. `Ok(None)` means the endpoint did not
    /// produce a usable payload this cycle (non-success status);
    /// `Err` means the request itself failed in transit.
    async fn get(&self, endpoint: &str, bearer_token: Option<&str>) -> Result<Option<String>>;
}

/// reqwest-backed fetcher used in production.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .map_err(|e| PdiError::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ApiFetcher for HttpFetcher {
    async fn get(&self, endpoint: &str, bearer_token: Option<&str>) -> Result<Option<String>> {
        let mut request = self.client.get(endpoint);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PdiError::TransientIo(format!("fetch of {} failed: {}", endpoint, e)))?;

        if !response.status().is_success() {
            warn!(
                endpoint = %endpoint,
                status = %response.status(),
                "Fetch returned non-success status"
            );
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| PdiError::TransientIo(format!("reading body of {}: {}", endpoint, e)))?;

        Ok(Some(body))
    }
}
