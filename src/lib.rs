//! # mail-access
//!
//! Async, quota-aware client for the Gmail REST API.
//!
//! This crate provides a high-level, async API for:
//! - Searching messages with structured filters or raw provider queries
//! - Fetching message headers and attachment metadata
//! - Downloading attachments, optionally in bounded parallel batches
//! - Watching a query for newly arriving messages
//!
//! Every upstream call is bounded by a concurrency gate, charged against a
//! daily quota budget and retried with exponential backoff when the provider
//! reports a transient failure. Obtaining OAuth2 tokens is left to the caller,
//! who plugs in a [`CredentialProvider`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use mail_access::{ClientConfig, Credential, MessageClient, SearchFilter, StaticCredentials};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> mail_access::Result<()> {
//! let client = MessageClient::new(ClientConfig::default())?;
//! client.authenticate(Arc::new(StaticCredentials::new(Credential::new("ya29.access-token"))));
//!
//! let filter = SearchFilter::builder()
//!     .sender("billing@vendor.io")
//!     .after("2025-01-01")
//!     .has_attachment(true)
//!     .build();
//!
//! let mut ids = client.search_filter(&filter, 100);
//! while let Some(id) = ids.next().await {
//!     let message = client.get_message_details(&id?, false).await?;
//!     println!("{} - {}", message.date(), message.subject());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Using a SOCKS5 Proxy
//!
//! ```no_run
//! use mail_access::{ClientConfig, MessageClient, Socks5Proxy};
//!
//! # fn example() -> mail_access::Result<()> {
//! let config = ClientConfig::builder()
//!     .proxy(Socks5Proxy::with_auth("proxy.example.com", 1080, "user", "pass"))
//!     .build()?;
//!
//! let client = MessageClient::new(config)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Building Queries
//!
//! ```
//! use mail_access::SearchFilter;
//!
//! let filter = SearchFilter::builder()
//!     .senders(["a@x.com", "b@x.com"])
//!     .extension(".pdf")
//!     .subject_excludes("newsletter")
//!     .build();
//!
//! assert_eq!(
//!     filter.to_query(),
//!     "(from:a@x.com OR from:b@x.com) filename:pdf -subject:newsletter"
//! );
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! to determine if an operation can be retried:
//!
//! ```
//! use mail_access::Error;
//!
//! fn handle_error(error: &Error) {
//!     match error {
//!         Error::QuotaExceeded { used, limit, .. } => {
//!             println!("Daily budget spent ({used}/{limit}), try again tomorrow");
//!         }
//!         e if e.is_retryable() => println!("Transient error, can retry: {e}"),
//!         e => println!("Permanent error ({}): {e}", e.category()),
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Operations emit spans with
//! structured fields; install any subscriber to see them.
//!
//! ### Span Naming Convention
//!
//! - `MessageClient::search` - One page of a search
//! - `MessageClient::get_message_details` - Header fetch
//! - `MessageClient::get_attachments` - Attachment listing
//! - `MessageClient::get_matching_attachments` - Filtered attachment listing
//! - `MessageClient::download_attachment` - Attachment download
//! - `MessageClient::download_attachments` - Batch download
//! - `RequestGate::execute` - One gated upstream call
//! - `HttpTransport::get` - HTTP exchange
//! - `ChangeWatcher::establish_baseline` / `ChangeWatcher::poll` - Watch cycle
//!
//! ### Standard Fields
//!
//! - `units` - Quota units charged by a call
//! - `query` - Provider search query
//! - `message_id` / `attachment_id` - Provider IDs
//! - `attempts` - Attempts made by the retrier
//!
//! Access tokens are never recorded.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod proxy;
pub mod query;
pub mod quota;
pub mod retry;
pub mod transport;
pub mod types;
pub mod watch;

// Internal modules
mod api;
mod client;
mod parser;

// Re-exports for ergonomic API
pub use auth::{Credential, CredentialProvider, StaticCredentials};
pub use client::{MessageClient, QuotaStatus};
pub use config::{ClientConfig, ClientConfigBuilder, TimeoutConfig};
pub use error::{Error, ErrorCategory, Result};
pub use gate::{GateStatistics, RequestGate};
pub use proxy::{ProxyAuth, Socks5Proxy};
pub use query::{build_query, SearchFilter, SearchFilterBuilder};
pub use quota::{QuotaReservation, QuotaState, QuotaTracker};
pub use retry::{BackoffRetrier, RetryConfig};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use types::{Attachment, AttachmentFilter, Message};
pub use watch::ChangeWatcher;
