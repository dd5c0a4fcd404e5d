//! Credential collaborator interface.
//!
//! This crate never obtains or persists OAuth2 tokens itself. Callers plug in a
//! [`CredentialProvider`] that hands out the current access token and can
//! refresh it when the provider rejects a call with `401`.
//!
//! ```
//! use mail_access::{Credential, StaticCredentials};
//!
//! let provider = StaticCredentials::new(Credential::new("ya29.access-token"));
//! # let _ = provider;
//! ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// OAuth2 access/refresh token pair.
///
/// Tokens are stored as [`SecretString`] and redacted from `Debug` output.
#[derive(Clone)]
pub struct Credential {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    /// When the access token stops being valid, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Creates a credential holding only an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Attaches a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    /// Sets the access token expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the bearer token. Never log the result.
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Returns the refresh token, if any.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .map(|token| token.expose_secret())
    }

    /// Returns `true` if the expiry is known and has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Source of credentials for [`MessageClient`](crate::MessageClient).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the credential to use for the next call, or `None` if the
    /// user has not signed in.
    async fn current(&self) -> Option<Credential>;

    /// Obtains a fresh credential after the provider rejected the current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the credential cannot be refreshed.
    async fn refresh(&self) -> Result<Credential>;
}

/// A fixed credential that cannot be refreshed.
///
/// Useful for short-lived tools that receive an access token from elsewhere.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    /// Wraps a credential.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current(&self) -> Option<Credential> {
        Some(self.credential.clone())
    }

    async fn refresh(&self) -> Result<Credential> {
        Err(Error::Authentication {
            message: "static credential cannot be refreshed".into(),
        })
    }
}
