//! Regulations.gov HTTP access

use crate::error::{ApiError, ApiResult};

use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Base URL of the v4 API
pub const API_BASE_URL: &str = "https://api.regulations.gov/v4";

/// Keeps us under 1000 calls per hour
pub const MIN_DELAY_BETWEEN_CALLS: Duration = Duration::from_millis(3600);

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of search result pages
///
/// Implemented by [`RegulationsApi`]; tests substitute scripted responses.
#[async_trait::async_trait]
pub trait SearchApi: Send + Sync {
    /// GET `url` with query `params`, failing on any non-success status
    async fn download(&self, url: &str, params: &[(String, String)]) -> ApiResult<Value>;
}

/// Source of single entities and attachment files
#[async_trait::async_trait]
pub trait FetchApi: Send + Sync {
    /// GET a job URL, returning the JSON body even for error statuses
    async fn fetch(&self, url: &str) -> ApiResult<Value>;

    /// GET a binary file
    async fn fetch_bytes(&self, url: &str) -> ApiResult<Vec<u8>>;
}

/// Rate-limited regulations.gov client
pub struct RegulationsApi {
    client: reqwest::Client,
    api_key: String,
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RegulationsApi {
    /// Create a client for the given API key
    pub fn new(api_key: impl Into<String>) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport {
                url: API_BASE_URL.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            min_delay: MIN_DELAY_BETWEEN_CALLS,
            last_call: Mutex::new(None),
        })
    }

    /// Override the spacing between calls
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        with_key: bool,
    ) -> ApiResult<reqwest::Response> {
        self.throttle().await;

        let mut request = self.client.get(url).query(params);
        if with_key {
            request = request.query(&[("api_key", self.api_key.as_str())]);
        }

        tracing::debug!("GET {}", url);
        request.send().await.map_err(|e| transport(url, e))
    }

    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[async_trait::async_trait]
impl SearchApi for RegulationsApi {
    async fn download(&self, url: &str, params: &[(String, String)]) -> ApiResult<Value> {
        let response = check_status(url, self.get(url, params, true).await?)?;
        response.json::<Value>().await.map_err(|e| ApiError::InvalidBody {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Upstream error payloads (`{"errors": [...]}`) come back as `Ok` so they
/// can be reported to the work server as invalid jobs. Attachment files are
/// fetched without the API key.
#[async_trait::async_trait]
impl FetchApi for RegulationsApi {
    async fn fetch(&self, url: &str) -> ApiResult<Value> {
        let response = self.get(url, &[], true).await?;
        let status = response.status();
        response.json::<Value>().await.map_err(|e| ApiError::InvalidBody {
            url: url.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), e),
        })
    }

    async fn fetch_bytes(&self, url: &str) -> ApiResult<Vec<u8>> {
        let response = check_status(url, self.get(url, &[], false).await?)?;
        let bytes = response.bytes().await.map_err(|e| transport(url, e))?;
        Ok(bytes.to_vec())
    }
}

fn check_status(url: &str, response: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

fn transport(url: &str, err: reqwest::Error) -> ApiError {
    ApiError::Transport {
        url: url.to_string(),
        reason: err.to_string(),
    }
}
