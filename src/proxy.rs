//! SOCKS5 proxy configuration for API traffic.
//!
//! The proxy is applied to the HTTP client built by
//! [`HttpTransport`](crate::HttpTransport). Host names are resolved by the
//! proxy (`socks5h`), so no DNS lookups leak from the local machine.
//!
//! # Example
//!
//! ```
//! use mail_access::Socks5Proxy;
//!
//! // Without authentication
//! let proxy = Socks5Proxy::new("proxy.example.com", 1080);
//!
//! // With authentication
//! let proxy = Socks5Proxy::with_auth("proxy.example.com", 1080, "username", "password");
//! ```

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};

/// SOCKS5 proxy configuration.
#[derive(Debug, Clone)]
pub struct Socks5Proxy {
    /// Proxy server hostname or IP address.
    pub host: String,
    /// Proxy server port.
    pub port: u16,
    /// Optional authentication credentials.
    pub auth: Option<ProxyAuth>,
}

/// Authentication credentials for SOCKS5 proxy.
#[derive(Clone)]
pub struct ProxyAuth {
    /// Username for proxy authentication.
    pub username: String,
    password: SecretString,
}

impl ProxyAuth {
    /// Returns the proxy password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl std::fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Socks5Proxy {
    /// Creates a new SOCKS5 proxy configuration without authentication.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auth: None,
        }
    }

    /// Creates a new SOCKS5 proxy configuration with authentication.
    #[must_use]
    pub fn with_auth(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            auth: Some(ProxyAuth {
                username: username.into(),
                password: SecretString::from(password.into()),
            }),
        }
    }

    /// Returns the proxy URL without credentials.
    #[must_use]
    pub fn url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.port)
    }

    /// Returns `true` if this proxy requires authentication.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.auth.is_some()
    }

    /// Converts this configuration into a proxy for the HTTP client.
    pub(crate) fn to_reqwest(&self) -> Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.url()).map_err(|e| Error::InvalidConfig {
            message: format!("invalid proxy {self}: {e}"),
        })?;

        Ok(match &self.auth {
            Some(auth) => proxy.basic_auth(&auth.username, auth.password()),
            None => proxy,
        })
    }
}

impl std::fmt::Display for Socks5Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.auth {
            Some(auth) => write!(
                f,
                "socks5h://{}:***@{}:{}",
                auth.username, self.host, self.port
            ),
            None => write!(f, "socks5h://{}:{}", self.host, self.port),
        }
    }
}
