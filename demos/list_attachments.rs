//! Example: Listing and downloading attachments with tracing enabled.
//!
//! Searches for messages from the given senders that carry attachments, prints
//! each attachment and downloads the ones matching the extension filter into
//! memory (sizes only; writing files is left to the caller).
//!
//! # Usage
//!
//! ```bash
//! export GMAIL_ACCESS_TOKEN="ya29...."
//! export SENDERS="billing@vendor.io,reports@example.com"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=mail_access=debug
//!
//! cargo run --example list_attachments
//! ```

use futures::StreamExt;
use mail_access::{
    AttachmentFilter, ClientConfig, Credential, MessageClient, SearchFilter, StaticCredentials,
};
use std::env;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mail_access::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_access=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .init();

    let token =
        env::var("GMAIL_ACCESS_TOKEN").expect("GMAIL_ACCESS_TOKEN environment variable required");
    let senders = env::var("SENDERS").unwrap_or_default();

    let filter = SearchFilter::builder()
        .senders(senders.split(',').filter(|s| !s.trim().is_empty()))
        .has_attachment(true)
        .after("2025-01-01")
        .build();

    tracing::info!(query = %filter.to_query(), "Starting search");

    let client = MessageClient::new(ClientConfig::builder().max_concurrent_downloads(3).build()?)?;
    client.authenticate(Arc::new(StaticCredentials::new(Credential::new(token))));

    let wanted = AttachmentFilter::default().with_extensions(["pdf", "csv", "xlsx"]);
    let mut ids = client.search_filter(&filter, 25);

    while let Some(id) = ids.next().await {
        let id = id?;
        let message = client.get_message_details(&id, false).await?;
        println!(
            "\n{} | {} | {}",
            message.date().format("%Y-%m-%d"),
            message.sender_address(),
            message.subject()
        );

        let attachments = client.get_matching_attachments(&id, &wanted).await?;
        for (attachment, result) in client.download_attachments(&attachments).await {
            match result {
                Ok(bytes) => println!(
                    "  {} ({}, {} bytes received)",
                    attachment.sanitized_filename(),
                    attachment.human_size(),
                    bytes.len()
                ),
                Err(e) => println!("  {} failed: {e}", attachment.filename),
            }
        }
    }

    let status = client.quota_status();
    println!(
        "\nQuota: {}/{} units, {} requests, {} rate limited",
        status.quota.units_used_today,
        status.quota.daily_limit,
        status.statistics.requests_made,
        status.statistics.rate_limited
    );

    Ok(())
}
