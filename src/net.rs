use crate::error::{AdError, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use std::time::Duration;

/// Connect/read timeout for individual ad-server requests. Kept short so a
/// single slow endpoint cannot stall the pipeline.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches a response body from a URL.
///
/// The transport behind this seam (interceptors, auth headers, proxies) is
/// an external concern; the pipeline only needs status + body.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Reports whether the device currently has network connectivity.
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Connectivity source for environments without a platform check.
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_connected(&self) -> bool {
        true
    }
}

/// `reqwest`-backed fetcher used for VAST documents.
///
/// Ad servers rotate creatives per request, so HTTP caching is disabled on
/// every fetch.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        // Random request ID for correlating log lines
        let req_id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();

        let url = url::Url::parse(url)?;
        debug!("[{req_id}] Fetching from URL: {url}");
        let start_time = std::time::Instant::now();

        let response = self
            .client
            .get(url)
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .send()
            .await
            .map_err(|e| {
                warn!("[{req_id}] Request failed after {:?}", start_time.elapsed());
                AdError::NetworkError(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        debug!(
            "[{req_id}] Received {} bytes in {:?}",
            body.len(),
            start_time.elapsed()
        );
        Ok(body)
    }
}
