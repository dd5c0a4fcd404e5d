//! Configuration for the mail API client.
//!
//! Use [`ClientConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use mail_access::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .requests_per_minute(120)
//!     .poll_interval(Duration::from_secs(60))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.concurrency_limit(), 2);
//! ```
//!
//! All values are read once, when the client is constructed.

use crate::error::{Error, Result};
use crate::proxy::Socks5Proxy;
use crate::retry::RetryConfig;
use email_address::EmailAddress;
use std::time::Duration;

/// Default Gmail REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 250;
const DEFAULT_REQUESTS_PER_DAY: u64 = 1_000_000;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Configuration for [`MessageClient`](crate::MessageClient).
///
/// Create using [`ClientConfig::builder()`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request rate the client is allowed; determines the concurrency limit.
    pub requests_per_minute: u32,
    /// Daily quota budget in provider units.
    pub requests_per_day: u64,
    /// Backoff and retry behavior.
    pub retry: RetryConfig,
    /// Default interval between watch polls.
    pub poll_interval: Duration,
    /// Upper bound on parallel attachment downloads for one message.
    pub max_concurrent_downloads: usize,
    /// Base URL of the REST API.
    pub api_base_url: String,
    /// Mailbox owner; `me` means the authenticated user.
    pub user_id: String,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Optional SOCKS5 proxy for API traffic.
    pub proxy: Option<Socks5Proxy>,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Maximum number of upstream calls in flight at once.
    ///
    /// Derived from the per-minute rate as `requests_per_minute / 60`, never below 1.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        usize::try_from(self.requests_per_minute / 60)
            .unwrap_or(usize::MAX)
            .max(1)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_day: DEFAULT_REQUESTS_PER_DAY,
            retry: RetryConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_id: "me".to_string(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            timeouts: TimeoutConfig::default(),
            proxy: None,
        }
    }
}

/// Timeout configuration for HTTP calls.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for one complete request/response exchange.
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(60),
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    requests_per_minute: Option<u32>,
    requests_per_day: Option<u64>,
    retry: Option<RetryConfig>,
    poll_interval: Option<Duration>,
    max_concurrent_downloads: Option<usize>,
    api_base_url: Option<String>,
    user_id: Option<String>,
    user_agent: Option<String>,
    timeouts: Option<TimeoutConfig>,
    proxy: Option<Socks5Proxy>,
}

impl ClientConfigBuilder {
    /// Sets the allowed request rate (default 250/minute).
    #[must_use]
    pub fn requests_per_minute(mut self, rate: u32) -> Self {
        self.requests_per_minute = Some(rate);
        self
    }

    /// Sets the daily quota budget (default 1,000,000 units).
    #[must_use]
    pub fn requests_per_day(mut self, units: u64) -> Self {
        self.requests_per_day = Some(units);
        self
    }

    /// Sets the full retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets how many times a failed call is retried (default 4, i.e. 5 attempts).
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.retry
            .get_or_insert_with(RetryConfig::default)
            .max_attempts = retries.saturating_add(1);
        self
    }

    /// Sets the exponential growth factor of the backoff delay (default 2.0).
    #[must_use]
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.retry
            .get_or_insert_with(RetryConfig::default)
            .backoff_factor = factor;
        self
    }

    /// Sets the first backoff delay before jitter (default 1s).
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.retry.get_or_insert_with(RetryConfig::default).base_delay = delay;
        self
    }

    /// Sets the ceiling for a single backoff delay (default 64s).
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.retry.get_or_insert_with(RetryConfig::default).max_delay = delay;
        self
    }

    /// Sets the cumulative wall-clock budget for retries (default 300s).
    #[must_use]
    pub fn retry_budget(mut self, budget: Duration) -> Self {
        self.retry
            .get_or_insert_with(RetryConfig::default)
            .total_budget = budget;
        self
    }

    /// Sets the default watch poll interval (default 30s).
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the parallel download limit for one message (default 5).
    #[must_use]
    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.max_concurrent_downloads = Some(limit);
        self
    }

    /// Overrides the REST API base URL.
    #[must_use]
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the mailbox owner: `me` (the default) or an email address.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the `User-Agent` header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .request = timeout;
        self
    }

    /// Routes API traffic through a SOCKS5 proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: Socks5Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a value is out of range.
    pub fn build(self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();

        let requests_per_minute = self
            .requests_per_minute
            .unwrap_or(defaults.requests_per_minute);
        if requests_per_minute == 0 {
            return Err(invalid("requests_per_minute must be positive"));
        }

        let requests_per_day = self.requests_per_day.unwrap_or(defaults.requests_per_day);
        if requests_per_day == 0 {
            return Err(invalid("requests_per_day must be positive"));
        }

        let retry = self.retry.unwrap_or(defaults.retry);
        retry.validate()?;

        let poll_interval = self.poll_interval.unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(invalid("poll_interval must be positive"));
        }

        let max_concurrent_downloads = self
            .max_concurrent_downloads
            .unwrap_or(defaults.max_concurrent_downloads);
        if max_concurrent_downloads == 0 {
            return Err(invalid("max_concurrent_downloads must be positive"));
        }

        let api_base_url = self
            .api_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);
        if api_base_url.is_empty() {
            return Err(invalid("api_base_url must not be empty"));
        }

        let user_id = self
            .user_id
            .map(|id| id.trim().to_string())
            .unwrap_or(defaults.user_id);
        if user_id.is_empty() {
            return Err(invalid("user_id must not be empty"));
        }
        if user_id != "me" && !EmailAddress::is_valid(&user_id) {
            return Err(Error::InvalidEmailFormat { email: user_id });
        }

        Ok(ClientConfig {
            requests_per_minute,
            requests_per_day,
            retry,
            poll_interval,
            max_concurrent_downloads,
            api_base_url,
            user_id,
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            timeouts: self.timeouts.unwrap_or(defaults.timeouts),
            proxy: self.proxy,
        })
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.into(),
    }
}
