//! Integration tests for mail-access.
//!
//! Most tests drive the public API against an in-memory mailbox that speaks
//! the same JSON as the REST API. Tests against a real account are disabled by
//! default. To run them:
//!
//! ```bash
//! # Set environment variables (or put them in .env)
//! export MAIL_ACCESS_TEST_TOKEN="ya29...."
//!
//! # Optional: proxy configuration
//! export MAIL_ACCESS_TEST_PROXY_HOST="proxy.example.com"
//! export MAIL_ACCESS_TEST_PROXY_PORT="1080"
//!
//! # Run with the integration-tests feature
//! cargo test --features integration-tests -- --ignored
//! ```

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::StreamExt;
use mail_access::{
    ApiRequest, ApiResponse, AttachmentFilter, ClientConfig, Credential, CredentialProvider,
    Error, MessageClient, SearchFilter, Socks5Proxy, StaticCredentials, Transport,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::env;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// In-memory mailbox
// ─────────────────────────────────────────────────────────────────────────────

/// Serves list/get/attachment requests from memory.
///
/// Responses queued with [`FakeMailbox::inject`] are served first, in order,
/// regardless of the request.
#[derive(Default)]
struct FakeMailbox {
    messages: Mutex<BTreeMap<String, Value>>,
    attachments: Mutex<HashMap<String, Vec<u8>>>,
    injected: Mutex<VecDeque<ApiResponse>>,
    accepted_token: Mutex<String>,
    requests: Mutex<Vec<ApiRequest>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeMailbox {
    fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            accepted_token: Mutex::new("token".into()),
            latency,
            ..Self::default()
        })
    }

    fn add_message(&self, id: &str, from: &str, subject: &str, files: &[(&str, &[u8])]) {
        let mut parts = vec![json!({
            "mimeType": "text/plain",
            "filename": "",
            "body": {"size": 5, "data": "aGVsbG8"}
        })];

        // Each file sits one multipart level below the previous one
        let mut nested: Option<Value> = None;
        for (index, (filename, content)) in files.iter().enumerate().rev() {
            let attachment_id = format!("{id}-att-{index}");
            self.attachments
                .lock()
                .unwrap()
                .insert(attachment_id.clone(), content.to_vec());

            let part = json!({
                "mimeType": "application/octet-stream",
                "filename": filename,
                "body": {"attachmentId": attachment_id, "size": content.len()}
            });

            nested = Some(match nested {
                None => part,
                Some(inner) => json!({
                    "mimeType": "multipart/mixed",
                    "filename": "",
                    "parts": [part, inner]
                }),
            });
        }
        parts.extend(nested);

        let message = json!({
            "id": id,
            "threadId": format!("thread-{id}"),
            "snippet": subject,
            "internalDate": "1735732800000",
            "payload": {
                "mimeType": "multipart/mixed",
                "filename": "",
                "headers": [
                    {"name": "From", "value": from},
                    {"name": "To", "value": "me@example.com"},
                    {"name": "Subject", "value": subject},
                    {"name": "Date", "value": "Wed, 1 Jan 2025 12:00:00 +0000"}
                ],
                "parts": parts
            }
        });

        self.messages.lock().unwrap().insert(id.to_string(), message);
    }

    fn inject(&self, response: ApiResponse) {
        self.injected.lock().unwrap().push_back(response);
    }

    fn accept_token(&self, token: &str) {
        *self.accepted_token.lock().unwrap() = token.to_string();
    }

    fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn route(&self, request: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = request.path.split('/').collect();
        match segments.as_slice() {
            ["users", "me", "messages"] => self.list(request),
            ["users", "me", "messages", id] => match self.messages.lock().unwrap().get(*id) {
                Some(message) => ok(message),
                None => not_found(),
            },
            ["users", "me", "messages", _, "attachments", attachment_id] => {
                match self.attachments.lock().unwrap().get(*attachment_id) {
                    Some(content) => ok(&json!({
                        "size": content.len(),
                        "data": URL_SAFE_NO_PAD.encode(content)
                    })),
                    None => not_found(),
                }
            }
            _ => not_found(),
        }
    }

    fn list(&self, request: &ApiRequest) -> ApiResponse {
        let max_results: usize = request
            .query_value("maxResults")
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let offset: usize = request
            .query_value("pageToken")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let messages = self.messages.lock().unwrap();
        let ids: Vec<Value> = messages
            .keys()
            .skip(offset)
            .take(max_results)
            .map(|id| json!({"id": id, "threadId": format!("thread-{id}")}))
            .collect();

        let next = offset + ids.len();
        let mut body = json!({"messages": ids, "resultSizeEstimate": messages.len()});
        if next < messages.len() {
            body["nextPageToken"] = json!(next.to_string());
        }
        ok(&body)
    }
}

#[async_trait]
impl Transport for FakeMailbox {
    async fn get(&self, request: &ApiRequest, access_token: &str) -> mail_access::Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.accepted_token.lock().unwrap() != access_token {
            return Ok(error_response(401, "authError"));
        }
        if let Some(response) = self.injected.lock().unwrap().pop_front() {
            return Ok(response);
        }
        Ok(self.route(request))
    }
}

fn ok(body: &Value) -> ApiResponse {
    ApiResponse::new(200, body.to_string())
}

fn not_found() -> ApiResponse {
    error_response(404, "notFound")
}

fn error_response(status: u16, reason: &str) -> ApiResponse {
    let body = json!({
        "error": {
            "code": status,
            "message": format!("{reason} (fake)"),
            "errors": [{"domain": "global", "reason": reason}]
        }
    });
    ApiResponse::new(status, body.to_string())
}

/// Starts with a stale token; refreshing yields `token`.
#[derive(Default)]
struct RefreshingCredentials {
    current: Mutex<Option<String>>,
    refreshes: AtomicU32,
}

impl RefreshingCredentials {
    fn stale() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Some("expired".into())),
            refreshes: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CredentialProvider for RefreshingCredentials {
    async fn current(&self) -> Option<Credential> {
        self.current.lock().unwrap().clone().map(Credential::new)
    }

    async fn refresh(&self) -> mail_access::Result<Credential> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = Some("token".into());
        Ok(Credential::new("token").with_refresh_token("refresh"))
    }
}

fn client_for(mailbox: &Arc<FakeMailbox>, config: ClientConfig) -> MessageClient {
    let client = MessageClient::with_transport(config, mailbox.clone());
    client.authenticate(Arc::new(StaticCredentials::new(Credential::new("token"))));
    client
}

fn default_client(mailbox: &Arc<FakeMailbox>) -> MessageClient {
    client_for(mailbox, ClientConfig::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Search Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_walks_all_pages() {
    let mailbox = FakeMailbox::new();
    for n in 0..1_200 {
        mailbox.add_message(&format!("m{n:04}"), "a@x.com", "bulk", &[]);
    }
    let client = default_client(&mailbox);

    let ids: Vec<String> = client
        .search("in:inbox", 1_100)
        .map(|id| id.expect("search page"))
        .collect()
        .await;

    assert_eq!(ids.len(), 1_100);
    assert_eq!(ids.first().map(String::as_str), Some("m0000"));
    assert_eq!(ids.last().map(String::as_str), Some("m1099"));

    let page_sizes: Vec<_> = mailbox
        .requests()
        .iter()
        .map(|r| r.query_value("maxResults").unwrap_or_default().to_string())
        .collect();
    assert_eq!(page_sizes, ["500", "500", "100"]);

    let status = client.quota_status();
    assert_eq!(status.quota.units_used_today, 3);
    assert_eq!(status.statistics.requests_made, 3);
}

#[tokio::test]
async fn test_search_filter_sends_built_query() {
    let mailbox = FakeMailbox::new();
    mailbox.add_message("m1", "a@x.com", "Invoice", &[("inv.pdf", b"%PDF")]);
    let client = default_client(&mailbox);

    let filter = SearchFilter::builder()
        .senders(["a@x.com", "b@x.com"])
        .has_attachment(true)
        .build();

    let ids: Vec<_> = client.search_filter(&filter, 10).collect().await;

    assert_eq!(ids.len(), 1);
    assert_eq!(
        mailbox.requests()[0].query_value("q"),
        Some("(from:a@x.com OR from:b@x.com) has:attachment")
    );
}

#[tokio::test]
async fn test_search_error_ends_stream() {
    let mailbox = FakeMailbox::new();
    mailbox.inject(error_response(403, "dailyLimitExceeded"));
    let client = default_client(&mailbox);

    let results: Vec<_> = client.search("", 50).collect().await;

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(Error::QuotaExceeded { .. })));
}

// ─────────────────────────────────────────────────────────────────────────────
// Message & Attachment Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_message_details() {
    let mailbox = FakeMailbox::new();
    mailbox.add_message(
        "m1",
        "Billing Team <Billing@Vendor.io>",
        "Invoice 2025-01",
        &[("invoice.pdf", b"%PDF-1.7"), ("usage.csv", b"a,b\n1,2\n")],
    );
    let client = default_client(&mailbox);

    let message = client.get_message_details("m1", false).await.unwrap();

    assert_eq!(message.id(), "m1");
    assert_eq!(message.thread_id(), "thread-m1");
    assert_eq!(message.subject(), "Invoice 2025-01");
    assert_eq!(message.sender_address(), "billing@vendor.io");
    assert_eq!(message.date().to_rfc3339(), "2025-01-01T12:00:00+00:00");
    assert!(message.has_attachments());
    assert_eq!(message.attachment_count(), 2);
    assert_eq!(client.quota_status().quota.units_used_today, 1);
}

#[tokio::test]
async fn test_attachments_found_at_any_depth() {
    let files: Vec<(String, Vec<u8>)> = (0..6)
        .map(|n| (format!("file-{n}.bin"), vec![n; 2048]))
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_slice()))
        .collect();

    let mailbox = FakeMailbox::new();
    mailbox.add_message("deep", "a@x.com", "nested", &refs);
    let client = default_client(&mailbox);

    let attachments = client.get_attachments("deep").await.unwrap();
    let details = client.get_message_details("deep", true).await.unwrap();

    assert_eq!(attachments.len(), 6);
    assert_eq!(details.attachment_count(), attachments.len());
    assert!(attachments.iter().all(|a| a.message_id == "deep"));
    assert_eq!(client.quota_status().quota.units_used_today, 10);
}

#[tokio::test]
async fn test_download_round_trip() {
    let mailbox = FakeMailbox::new();
    let content: Vec<u8> = (0..=255).collect();
    mailbox.add_message("m1", "a@x.com", "binary", &[("bytes.bin", &content)]);
    let client = default_client(&mailbox);

    let attachments = client.get_attachments("m1").await.unwrap();
    let downloaded = client
        .download_attachment("m1", &attachments[0].attachment_id)
        .await
        .unwrap();

    assert_eq!(downloaded, content);
    assert_eq!(client.quota_status().quota.units_used_today, 15);
}

#[tokio::test]
async fn test_matching_attachments() {
    let mailbox = FakeMailbox::new();
    let big = vec![0u8; 4096];
    mailbox.add_message(
        "m1",
        "a@x.com",
        "mixed",
        &[("report.PDF", &big), ("logo.png", &big), ("tiny.pdf", b"x")],
    );
    let client = default_client(&mailbox);

    let filter = AttachmentFilter::default().with_extensions([".pdf"]);
    let matching = client.get_matching_attachments("m1", &filter).await.unwrap();

    let names: Vec<_> = matching.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(names, ["report.PDF"]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_downloads_respect_gate() {
    let mailbox = FakeMailbox::with_latency(Duration::from_millis(200));
    let files: Vec<(String, Vec<u8>)> = (0..8)
        .map(|n| (format!("part-{n}.dat"), vec![n; 16]))
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_slice()))
        .collect();
    mailbox.add_message("m1", "a@x.com", "parts", &refs);

    // 120 requests/minute allows two calls in flight
    let config = ClientConfig::builder()
        .requests_per_minute(120)
        .max_concurrent_downloads(5)
        .build()
        .unwrap();
    let client = client_for(&mailbox, config);

    let attachments = client.get_attachments("m1").await.unwrap();
    let results = client.download_attachments(&attachments).await;

    assert_eq!(results.len(), 8);
    for (attachment, result) in &results {
        let bytes = result.as_ref().expect("download");
        assert_eq!(bytes.len(), 16);
        assert_eq!(attachment.size_bytes, 16);
    }
    assert_eq!(mailbox.peak_in_flight.load(Ordering::SeqCst), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Quota, Throttling & Authentication Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_download_rejected_when_budget_spent() {
    let mailbox = FakeMailbox::new();
    mailbox.add_message("m1", "a@x.com", "s", &[("a.txt", b"a"), ("b.txt", b"b")]);
    let config = ClientConfig::builder().requests_per_day(15).build().unwrap();
    let client = client_for(&mailbox, config);

    let attachments = client.get_attachments("m1").await.unwrap();
    client
        .download_attachment("m1", &attachments[0].attachment_id)
        .await
        .unwrap();
    let sent_before = mailbox.requests().len();

    let result = client
        .download_attachment("m1", &attachments[1].attachment_id)
        .await;

    assert!(matches!(
        result,
        Err(Error::QuotaExceeded {
            used: 15,
            limit: 15,
            requested: 10
        })
    ));
    assert_eq!(mailbox.requests().len(), sent_before);
    assert_eq!(client.quota_status().quota.units_used_today, 15);
    assert_eq!(client.quota_status().statistics.quota_rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limits_are_waited_out() {
    let mailbox = FakeMailbox::new();
    mailbox.add_message("m1", "a@x.com", "s", &[]);
    for secs in [2, 4, 8] {
        mailbox.inject(
            error_response(429, "rateLimitExceeded").with_retry_after(Duration::from_secs(secs)),
        );
    }
    let client = default_client(&mailbox);
    let started = Instant::now();

    let message = client.get_message_details("m1", false).await.unwrap();

    assert_eq!(message.id(), "m1");
    assert!(started.elapsed() >= Duration::from_secs(14));
    assert_eq!(mailbox.requests().len(), 4);
    assert_eq!(client.quota_status().statistics.rate_limited, 3);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_rate_limit_surfaces_client_error() {
    let mailbox = FakeMailbox::new();
    for _ in 0..10 {
        mailbox.inject(error_response(403, "userRateLimitExceeded"));
    }
    let client = default_client(&mailbox);

    let result = client.get_attachments("m1").await;

    match result {
        Err(Error::Client {
            operation,
            attempts,
            source,
        }) => {
            assert_eq!(operation, "get_attachments");
            assert_eq!(attempts, 5);
            assert!(matches!(*source, Error::RateLimited { .. }));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_provider_quota_error_not_retried() {
    let mailbox = FakeMailbox::new();
    mailbox.inject(error_response(403, "quotaExceeded"));
    let client = default_client(&mailbox);

    let result = client.download_attachment("m1", "a1").await;

    assert!(matches!(result, Err(Error::QuotaExceeded { .. })));
    assert_eq!(mailbox.requests().len(), 1);
}

#[tokio::test]
async fn test_stale_token_refreshed_once() {
    let mailbox = FakeMailbox::new();
    mailbox.add_message("m1", "a@x.com", "s", &[]);
    let credentials = RefreshingCredentials::stale();
    let client = MessageClient::with_transport(ClientConfig::default(), mailbox.clone());
    client.authenticate(credentials.clone());

    let message = client.get_message_details("m1", false).await.unwrap();

    assert_eq!(message.id(), "m1");
    assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(client.quota_status().statistics.reauthentications, 1);
    assert_eq!(mailbox.requests().len(), 2);
}

#[tokio::test]
async fn test_rejected_refresh_is_fatal() {
    let mailbox = FakeMailbox::new();
    mailbox.accept_token("something-else");
    let credentials = RefreshingCredentials::stale();
    let client = MessageClient::with_transport(ClientConfig::default(), mailbox.clone());
    client.authenticate(credentials.clone());

    let result = client.get_message_details("m1", false).await;

    assert!(matches!(result, Err(Error::Authentication { .. })));
    assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(mailbox.requests().len(), 2);
}

#[tokio::test]
async fn test_not_authenticated() {
    let mailbox = FakeMailbox::new();
    let client = MessageClient::with_transport(ClientConfig::default(), mailbox.clone());

    let result = client.download_attachment("m1", "a1").await;
    let first = client.search("", 10).next().await;

    assert!(matches!(result, Err(Error::NotAuthenticated)));
    assert!(matches!(first, Some(Err(Error::NotAuthenticated))));
    assert!(mailbox.requests().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Watch Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_watch_reports_arrivals_once() {
    let mailbox = FakeMailbox::new();
    mailbox.add_message("m1", "a@x.com", "old", &[]);
    mailbox.add_message("m2", "a@x.com", "old", &[]);
    let client = default_client(&mailbox);
    let cancel = CancellationToken::new();

    let mut arrivals = client.watch("", Duration::from_secs(30), cancel.clone());

    let producer = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            for id in ["m3", "m5", "m4"] {
                mailbox.add_message(id, "b@x.com", "new", &[]);
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
            mailbox.add_message("m0", "b@x.com", "late", &[]);
        })
    };

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(arrivals.next().await.expect("watch stream"));
    }
    cancel.cancel();

    assert_eq!(seen, ["m3", "m4", "m5", "m0"]);
    assert_eq!(arrivals.next().await, None);
    producer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watch_default_uses_configured_interval() {
    let mailbox = FakeMailbox::new();
    let config = ClientConfig::builder()
        .poll_interval(Duration::from_secs(5))
        .build()
        .unwrap();
    let client = client_for(&mailbox, config);
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let mut arrivals = client.watch_default("", cancel.clone());
    let producer = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            mailbox.add_message("fresh", "a@x.com", "hi", &[]);
        })
    };

    assert_eq!(arrivals.next().await.as_deref(), Some("fresh"));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(15));
    cancel.cancel();
    producer.await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Live API Tests
// ─────────────────────────────────────────────────────────────────────────────

fn get_test_token() -> Option<String> {
    dotenvy::dotenv().ok();
    env::var("MAIL_ACCESS_TEST_TOKEN").ok()
}

fn get_test_proxy() -> Option<Socks5Proxy> {
    let host = env::var("MAIL_ACCESS_TEST_PROXY_HOST").ok()?;
    let port: u16 = env::var("MAIL_ACCESS_TEST_PROXY_PORT").ok()?.parse().ok()?;

    let proxy = match (
        env::var("MAIL_ACCESS_TEST_PROXY_USER").ok(),
        env::var("MAIL_ACCESS_TEST_PROXY_PASS").ok(),
    ) {
        (Some(user), Some(pass)) => Socks5Proxy::with_auth(&host, port, user, pass),
        _ => Socks5Proxy::new(host, port),
    };

    Some(proxy)
}

fn get_live_client() -> Option<MessageClient> {
    let token = get_test_token()?;

    let mut builder = ClientConfig::builder().requests_per_minute(60);
    if let Some(proxy) = get_test_proxy() {
        builder = builder.proxy(proxy);
    }

    let client = MessageClient::new(builder.build().ok()?).ok()?;
    client.authenticate(Arc::new(StaticCredentials::new(Credential::new(token))));
    Some(client)
}

#[tokio::test]
#[ignore = "requires real Gmail account"]
async fn test_live_search_and_details() {
    let client = get_live_client().expect("Test token from environment variables");

    let ids: Vec<String> = client
        .search("in:inbox", 5)
        .map(|id| id.expect("Failed to search"))
        .collect()
        .await;

    for id in &ids {
        let message = client
            .get_message_details(id, false)
            .await
            .expect("Failed to fetch message");
        assert_eq!(message.id(), id);
    }
    assert!(client.quota_status().quota.units_used_today >= 1);
}

#[tokio::test]
#[ignore = "requires real Gmail account"]
async fn test_live_attachment_download() {
    let client = get_live_client().expect("Test token from environment variables");

    let Some(id) = client.search("has:attachment", 1).next().await else {
        return;
    };
    let id = id.expect("Failed to search");

    let attachments = client.get_attachments(&id).await.expect("Failed to list");
    if let Some(first) = attachments.first() {
        let bytes = client
            .download_attachment(&first.message_id, &first.attachment_id)
            .await
            .expect("Failed to download");
        assert!(!bytes.is_empty());
    }
}

#[tokio::test]
#[ignore = "requires intentionally invalid token"]
async fn test_live_invalid_token() {
    let client = MessageClient::new(ClientConfig::default()).expect("client");
    client.authenticate(Arc::new(StaticCredentials::new(Credential::new("invalid"))));

    let result = client.get_message_details("0", false).await;

    assert!(matches!(result, Err(Error::Authentication { .. })));
}
