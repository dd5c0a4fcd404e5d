//! HTTP seam between the client and the upstream REST API.
//!
//! [`MessageClient`](crate::MessageClient) never talks to `reqwest` directly; it
//! hands an [`ApiRequest`] and a bearer token to a [`Transport`] and classifies
//! the [`ApiResponse`] it gets back. [`HttpTransport`] is the production
//! implementation. Tests plug in an in-memory transport instead.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, RETRY_AFTER};
use std::time::Duration;
use tracing::{debug, instrument};

/// A `GET` request relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path below the base URL, without a leading slash.
    pub path: String,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Creates a request for `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Returns the first value of query parameter `name`.
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Raw response from the upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Creates a response without a `Retry-After` header.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Sets the `Retry-After` delay.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs authenticated requests against the upstream API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` with `access_token` as bearer credential.
    ///
    /// Non-2xx responses are returned as `Ok`; only failures to obtain a
    /// response at all are errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] or [`Error::Transient`] if no response was received.
    async fn get(&self, request: &ApiRequest, access_token: &str) -> Result<ApiResponse>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Builds the HTTP client from the timeouts, user agent and proxy in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy is invalid or the client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect)
            .timeout(config.timeouts.request)
            .user_agent(config.user_agent.as_str());

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(proxy.to_reqwest()?);
        }

        let client = builder.build().map_err(|source| Error::Http {
            operation: "build_client",
            source,
        })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(
        name = "HttpTransport::get",
        skip_all,
        fields(path = %request.path)
    )]
    async fn get(&self, request: &ApiRequest, access_token: &str) -> Result<ApiResponse> {
        let url = format!("{}/{}", self.base_url, request.path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&request.query)
            .send()
            .await
            .map_err(|source| Error::Http {
                operation: "send",
                source,
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| parse_retry_after(value, Utc::now()));

        let body = response.bytes().await.map_err(|source| Error::Http {
            operation: "read_body",
            source,
        })?;

        debug!(status, body_len = body.len(), "Received response");

        Ok(ApiResponse {
            status,
            retry_after,
            body: body.to_vec(),
        })
    }
}

/// Parses `Retry-After` as delta-seconds or as an HTTP date.
fn parse_retry_after(value: &HeaderValue, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
