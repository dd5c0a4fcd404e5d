//! Example: Watching a query for new messages until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! export GMAIL_ACCESS_TOKEN="ya29...."
//! export RUST_LOG=mail_access=debug
//!
//! cargo run --example watch_inbox -- "has:attachment"
//! ```

use futures::StreamExt;
use mail_access::{ClientConfig, Credential, MessageClient, StaticCredentials};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mail_access::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_access=info")),
        )
        .init();

    let token =
        env::var("GMAIL_ACCESS_TOKEN").expect("GMAIL_ACCESS_TOKEN environment variable required");
    let query = env::args().nth(1).unwrap_or_else(|| "in:inbox".to_string());

    let config = ClientConfig::builder()
        .poll_interval(Duration::from_secs(20))
        .build()?;
    let client = MessageClient::new(config)?;
    client.authenticate(Arc::new(StaticCredentials::new(Credential::new(token))));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping watch");
                cancel.cancel();
            }
        }
    });

    println!("Watching \"{query}\" (Ctrl-C to stop)");
    let mut arrivals = client.watch_default(query, cancel);

    while let Some(id) = arrivals.next().await {
        match client.get_message_details(&id, false).await {
            Ok(message) => println!("{} | {} | {}", id, message.sender(), message.subject()),
            Err(e) => tracing::warn!(id = %id, error = %e, "Could not fetch new message"),
        }
    }

    let status = client.quota_status();
    println!("Used {} quota units", status.quota.units_used_today);
    Ok(())
}
