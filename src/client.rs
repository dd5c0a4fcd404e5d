//! Quota-aware client for the Gmail REST API.
//!
//! The [`MessageClient`] is the main entry point for this crate. It provides
//! async methods to:
//!
//! - Search for message IDs (lazily paginated)
//! - Fetch message headers and attachment metadata
//! - Download attachment content, one at a time or in bounded parallel batches
//! - Watch a query for newly arriving messages
//!
//! Every upstream call goes through the same pipeline: the [`BackoffRetrier`]
//! re-runs the call on retryable failures, the [`RequestGate`] bounds
//! concurrency, charges quota and handles one credential refresh on `401`.
//!
//! # Example
//!
//! ```no_run
//! use mail_access::{ClientConfig, Credential, MessageClient, StaticCredentials};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> mail_access::Result<()> {
//! let client = MessageClient::new(ClientConfig::default())?;
//! client.authenticate(Arc::new(StaticCredentials::new(Credential::new("ya29.token"))));
//!
//! let mut ids = client.search("has:attachment newer_than:7d", 50);
//! while let Some(id) = ids.next().await {
//!     let id = id?;
//!     for attachment in client.get_attachments(&id).await? {
//!         println!("{} ({})", attachment.filename, attachment.human_size());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::api::{self, AttachmentBody, GmailMessage, ListMessagesResponse};
use crate::auth::CredentialProvider;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::gate::{GateStatistics, RequestGate};
use crate::parser;
use crate::query::{build_query, SearchFilter};
use crate::quota::{QuotaState, QuotaTracker};
use crate::retry::BackoffRetrier;
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::types::{Attachment, AttachmentFilter, Message};
use crate::watch::ChangeWatcher;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Largest page the list endpoint returns.
const MAX_PAGE_SIZE: usize = 500;

const LIST_COST: u64 = 1;
const METADATA_COST: u64 = 1;
const FULL_MESSAGE_COST: u64 = 5;
const ATTACHMENT_COST: u64 = 10;

/// URL-safe alphabet, padding optional.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Quota usage together with the gate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Current daily window.
    pub quota: QuotaState,
    /// Request counters since the client was created.
    pub statistics: GateStatistics,
}

/// Async client for message search, retrieval and attachment download.
///
/// Cloning is cheap: clones share the HTTP client, the quota budget, the
/// concurrency limit and the credential provider.
///
/// # Lifecycle
///
/// 1. Create a client with [`new`](Self::new) (or [`with_transport`](Self::with_transport))
/// 2. Supply credentials with [`authenticate`](Self::authenticate)
/// 3. Call data operations; before step 2 they fail with [`Error::NotAuthenticated`]
#[derive(Clone)]
pub struct MessageClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    gate: RequestGate,
    retrier: BackoffRetrier,
    credentials: RwLock<Option<Arc<dyn CredentialProvider>>>,
}

impl MessageClient {
    /// Creates an unauthenticated client talking HTTP to the configured API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (e.g. invalid proxy).
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates an unauthenticated client on top of a custom [`Transport`].
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let quota = QuotaTracker::new(config.requests_per_day);
        let gate = RequestGate::new(config.concurrency_limit(), quota);
        let retrier = BackoffRetrier::new(config.retry.clone());

        debug!(
            concurrency = gate.concurrency_limit(),
            daily_limit = config.requests_per_day,
            "Client created"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                gate,
                retrier,
                credentials: RwLock::new(None),
            }),
        }
    }

    /// Supplies the credential source; data operations become available.
    ///
    /// Replaces any previously supplied provider, for this client and its clones.
    pub fn authenticate(&self, provider: Arc<dyn CredentialProvider>) {
        *self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
        debug!("Credential provider installed");
    }

    /// Returns `true` once [`authenticate`](Self::authenticate) has been called.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current quota usage and request counters.
    #[must_use]
    pub fn quota_status(&self) -> QuotaStatus {
        QuotaStatus {
            quota: self.inner.gate.quota().current_status(),
            statistics: self.inner.gate.statistics(),
        }
    }

    /// Lazily lists IDs of messages matching `query`, newest first.
    ///
    /// Pages of up to 500 IDs are fetched on demand, each costing one quota
    /// unit. The stream ends after `max_results` IDs or the last page. A failed
    /// page fetch is yielded as an error and ends the stream.
    pub fn search(
        &self,
        query: impl Into<String>,
        max_results: usize,
    ) -> BoxStream<'static, Result<String>> {
        let pager = Pager {
            client: self.clone(),
            query: query.into(),
            remaining: max_results,
            page_token: None,
            buffered: VecDeque::new(),
            exhausted: max_results == 0,
        };

        stream::unfold(pager, |mut pager| async move {
            loop {
                if let Some(id) = pager.buffered.pop_front() {
                    return Some((Ok(id), pager));
                }
                if pager.exhausted {
                    return None;
                }
                if let Err(e) = pager.fetch_next().await {
                    pager.exhausted = true;
                    return Some((Err(e), pager));
                }
            }
        })
        .boxed()
    }

    /// Like [`search`](Self::search), with the query built from `filter`.
    pub fn search_filter(
        &self,
        filter: &SearchFilter,
        max_results: usize,
    ) -> BoxStream<'static, Result<String>> {
        self.search(build_query(filter), max_results)
    }

    /// Fetches header information for one message.
    ///
    /// Costs 1 quota unit, or 5 when `include_body` requests the full payload.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] before [`authenticate`](Self::authenticate)
    /// - [`Error::QuotaExceeded`] if the daily budget is spent
    /// - [`Error::Client`] if the provider keeps failing
    #[instrument(name = "MessageClient::get_message_details", skip(self))]
    pub async fn get_message_details(
        &self,
        message_id: &str,
        include_body: bool,
    ) -> Result<Message> {
        let (format, units) = if include_body {
            ("full", FULL_MESSAGE_COST)
        } else {
            ("metadata", METADATA_COST)
        };

        let raw: GmailMessage = self
            .get_json(
                "get_message_details",
                units,
                self.message_request(message_id, format),
                "message",
            )
            .await?;

        Ok(parser::parse_message(&raw))
    }

    /// Lists the attachments of one message. Costs 5 quota units.
    ///
    /// # Errors
    ///
    /// Same as [`get_message_details`](Self::get_message_details).
    #[instrument(name = "MessageClient::get_attachments", skip(self))]
    pub async fn get_attachments(&self, message_id: &str) -> Result<Vec<Attachment>> {
        let raw: GmailMessage = self
            .get_json(
                "get_attachments",
                FULL_MESSAGE_COST,
                self.message_request(message_id, "full"),
                "message",
            )
            .await?;

        let attachments = raw
            .payload
            .as_ref()
            .map(|payload| parser::attachments(&raw.id, payload))
            .unwrap_or_default();

        debug!(count = attachments.len(), "Found attachments");
        Ok(attachments)
    }

    /// Lists the attachments of one message that pass `filter`.
    ///
    /// # Errors
    ///
    /// Same as [`get_attachments`](Self::get_attachments).
    #[instrument(name = "MessageClient::get_matching_attachments", skip(self, filter))]
    pub async fn get_matching_attachments(
        &self,
        message_id: &str,
        filter: &AttachmentFilter,
    ) -> Result<Vec<Attachment>> {
        let mut attachments = self.get_attachments(message_id).await?;
        attachments.retain(|attachment| {
            let keep = filter.matches(attachment);
            if !keep {
                debug!(
                    filename = %attachment.filename,
                    size = attachment.size_bytes,
                    "Attachment filtered out"
                );
            }
            keep
        });
        Ok(attachments)
    }

    /// Downloads the content of one attachment. Costs 10 quota units.
    ///
    /// # Errors
    ///
    /// Same as [`get_message_details`](Self::get_message_details), plus
    /// [`Error::DecodeAttachment`] if the payload is not valid base64.
    #[instrument(name = "MessageClient::download_attachment", skip(self))]
    pub async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let request = ApiRequest::new(format!(
            "users/{}/messages/{message_id}/attachments/{attachment_id}",
            self.inner.config.user_id
        ));

        let body: AttachmentBody = self
            .get_json("download_attachment", ATTACHMENT_COST, request, "attachment")
            .await?;

        let bytes = URL_SAFE_LENIENT
            .decode(body.data.trim_end())
            .map_err(|source| Error::DecodeAttachment {
                attachment_id: attachment_id.to_string(),
                source,
            })?;

        debug!(bytes = bytes.len(), "Attachment downloaded");
        Ok(bytes)
    }

    /// Downloads several attachments, at most `max_concurrent_downloads` at once.
    ///
    /// Each download still goes through the request gate, so the global
    /// concurrency limit holds as well. Results are returned in completion order;
    /// one failure does not abort the others.
    #[instrument(
        name = "MessageClient::download_attachments",
        skip_all,
        fields(count = attachments.len())
    )]
    pub async fn download_attachments(
        &self,
        attachments: &[Attachment],
    ) -> Vec<(Attachment, Result<Vec<u8>>)> {
        let client = self;
        let results: Vec<_> = stream::iter(attachments.iter().cloned())
            .map(move |attachment| async move {
                let result = client
                    .download_attachment(&attachment.message_id, &attachment.attachment_id)
                    .await;
                if let Err(e) = &result {
                    warn!(filename = %attachment.filename, error = %e, "Attachment download failed");
                }
                (attachment, result)
            })
            .buffer_unordered(self.inner.config.max_concurrent_downloads)
            .collect()
            .await;

        results
    }

    /// Watches `query` and yields IDs of messages that arrive after the call.
    ///
    /// The first search establishes the baseline; afterwards the query is polled
    /// every `interval`. Poll failures are logged and skipped. The stream ends
    /// when `cancel` fires.
    #[must_use]
    pub fn watch(
        &self,
        query: impl Into<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> BoxStream<'static, String> {
        ChangeWatcher::new(self.clone(), query, interval).into_stream(cancel)
    }

    /// [`watch`](Self::watch) using the configured poll interval.
    #[must_use]
    pub fn watch_default(
        &self,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, String> {
        self.watch(query, self.inner.config.poll_interval, cancel)
    }

    fn message_request(&self, message_id: &str, format: &str) -> ApiRequest {
        ApiRequest::new(format!(
            "users/{}/messages/{message_id}",
            self.inner.config.user_id
        ))
        .param("format", format)
    }

    fn credentials(&self) -> Result<Arc<dyn CredentialProvider>> {
        self.inner
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotAuthenticated)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        units: u64,
        request: ApiRequest,
        context: &'static str,
    ) -> Result<T> {
        let body = self.call(operation, units, request).await?;
        api::from_slice(&body).map_err(|source| Error::ParseResponse { context, source })
    }

    /// Sends `request` through the retrier and the gate.
    async fn call(
        &self,
        operation: &'static str,
        units: u64,
        request: ApiRequest,
    ) -> Result<Vec<u8>> {
        let provider = self.credentials()?;

        let credentials: &dyn CredentialProvider = provider.as_ref();
        let gate = &self.inner.gate;
        let transport = &self.inner.transport;
        let request = &request;

        let (result, attempts) = self
            .inner
            .retrier
            .run(move || {
                gate.execute(units, credentials, move |credential| async move {
                    transport.get(request, credential.access_token()).await
                })
            })
            .await;

        match result {
            Ok(response) => Ok(response.body),
            Err(e) if e.is_retryable() => {
                warn!(operation, attempts, error = %e, "Giving up after retries");
                Err(Error::Client {
                    operation,
                    attempts,
                    source: Box::new(e),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn list_page(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<ListMessagesResponse> {
        let mut request = ApiRequest::new(format!("users/{}/messages", self.inner.config.user_id))
            .param("maxResults", page_size.to_string());
        if !query.is_empty() {
            request = request.param("q", query);
        }
        if let Some(token) = page_token {
            request = request.param("pageToken", token);
        }

        self.get_json("search", LIST_COST, request, "message list").await
    }
}

impl std::fmt::Debug for MessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageClient")
            .field("api_base_url", &self.inner.config.api_base_url)
            .field("user_id", &self.inner.config.user_id)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

/// Pagination state behind [`MessageClient::search`].
struct Pager {
    client: MessageClient,
    query: String,
    remaining: usize,
    page_token: Option<String>,
    buffered: VecDeque<String>,
    exhausted: bool,
}

impl Pager {
    #[instrument(
        name = "MessageClient::search",
        skip(self),
        fields(query = %self.query, remaining = self.remaining)
    )]
    async fn fetch_next(&mut self) -> Result<()> {
        let page_size = self.remaining.min(MAX_PAGE_SIZE);
        let page = self
            .client
            .list_page(&self.query, page_size, self.page_token.take())
            .await?;

        let ids: Vec<String> = page
            .messages
            .into_iter()
            .take(self.remaining)
            .map(|m| m.id)
            .collect();

        debug!(
            received = ids.len(),
            has_more = page.next_page_token.is_some(),
            "Fetched page"
        );

        self.remaining -= ids.len();
        self.page_token = page.next_page_token;
        self.exhausted = self.remaining == 0 || self.page_token.is_none() || ids.is_empty();
        self.buffered.extend(ids);
        Ok(())
    }
}
