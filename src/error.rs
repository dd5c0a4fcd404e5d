//! Error types for the mail-access crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during mail API operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// A data operation was invoked before credentials were supplied.
    #[error("client is not authenticated")]
    NotAuthenticated,

    /// Authorization failed and could not be resolved by a credential refresh.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Throttling errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The provider asked us to slow down (RETRYABLE).
    #[error("rate limited by provider ({reason})")]
    RateLimited {
        /// Server-provided delay before the next attempt, if any.
        retry_after: Option<Duration>,
        /// Machine-readable reason reported by the provider.
        reason: String,
    },

    /// The daily quota budget is exhausted (NOT retryable).
    #[error("daily quota exceeded: {used}/{limit} units used, {requested} requested")]
    QuotaExceeded {
        /// Units already consumed in the current window.
        used: u64,
        /// Daily budget.
        limit: u64,
        /// Units the rejected call needed.
        requested: u64,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Provider / network errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// The provider returned an error response that may succeed on retry.
    #[error("provider error (status {status:?}, reason {reason:?}): {message}")]
    Transient {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Machine-readable reason reported by the provider.
        reason: Option<String>,
        /// Description of the failure.
        message: String,
    },

    /// The HTTP request could not be completed.
    #[error("HTTP request failed during {operation}")]
    Http {
        /// The operation being performed.
        operation: &'static str,
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Surfaced provider errors (NOT retryable - retry budget already spent)
    // ─────────────────────────────────────────────────────────────────────────
    /// A provider error survived the retry budget.
    #[error("{operation} failed after {attempts} attempt(s)")]
    Client {
        /// The operation being performed.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Payload errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to deserialize a provider response.
    #[error("failed to parse {context} response")]
    ParseResponse {
        /// Which response was being parsed.
        context: &'static str,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Attachment payload was not valid URL-safe base64.
    #[error("failed to decode attachment {attachment_id}")]
    DecodeAttachment {
        /// The attachment being decoded.
        attachment_id: String,
        /// The underlying decode error.
        #[source]
        source: base64::DecodeError,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// [`BackoffRetrier`](crate::BackoffRetrier) only retries errors for which this returns `true`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { .. } | Error::Transient { .. } | Error::Http { .. } => true,

            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::NotAuthenticated
            | Error::Authentication { .. }
            | Error::QuotaExceeded { .. }
            | Error::Client { .. }
            | Error::ParseResponse { .. }
            | Error::DecodeAttachment { .. } => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. } | Error::InvalidConfig { .. } => {
                ErrorCategory::Configuration
            }

            Error::NotAuthenticated | Error::Authentication { .. } => ErrorCategory::Authentication,

            Error::RateLimited { .. } => ErrorCategory::RateLimit,

            Error::QuotaExceeded { .. } => ErrorCategory::Quota,

            Error::Http { .. } => ErrorCategory::Network,

            Error::Transient { .. } => ErrorCategory::Protocol,

            Error::Client { source, .. } => source.category(),

            Error::ParseResponse { .. } | Error::DecodeAttachment { .. } => ErrorCategory::Parse,
        }
    }

    /// Server-provided retry delay, for [`Error::RateLimited`].
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Missing or rejected credentials.
    Authentication,
    /// Provider throttling.
    RateLimit,
    /// Daily quota exhaustion.
    Quota,
    /// Network connectivity errors.
    Network,
    /// Provider error responses.
    Protocol,
    /// Malformed response payloads.
    Parse,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::RateLimit => write!(f, "rate_limit"),
            ErrorCategory::Quota => write!(f, "quota"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
        }
    }
}
