//! HTTP client for the REST side of the service.
//!
//! Dataset refresh and price lookups go through [`RestClient`]. REST calls
//! are single-shot: they are never retried, and any non-success status is
//! returned to the caller as [`ClientError::HttpStatus`].

use crate::error::{ClientError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "x-api-key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE_PER_HOST: usize = 10;

/// Authenticated HTTP client bound to one base URL.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Create a client for `base_url` (e.g. `https://data.spiceai.io`).
    ///
    /// The API key and user agent are attached to every request.
    pub fn new(base_url: &str, api_key: &str, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| ClientError::Config("apiKey contains invalid characters".to_string()))?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.http_client
            .get(url)
            .header(ACCEPT, "application/json")
    }

    pub(crate) fn post_json(&self, url: &str) -> RequestBuilder {
        self.http_client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
    }

    /// Send `request`, failing unless the response status is `expected`.
    pub(crate) async fn send_expecting(
        &self,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
        expected: StatusCode,
    ) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            debug!(method, url, status = status.as_u16(), "REST call failed");
            return Err(ClientError::HttpStatus {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a JSON response body.
    pub(crate) async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
