//! Polling watcher that reports newly arrived messages.
//!
//! A [`ChangeWatcher`] remembers every message ID it has seen for its query
//! (the baseline). Each poll runs the query again and reports the IDs that are
//! not in the baseline yet, sorted ascending, then adds them to it.
//!
//! ```no_run
//! use mail_access::{ClientConfig, Credential, MessageClient, StaticCredentials};
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mail_access::Result<()> {
//! let client = MessageClient::new(ClientConfig::default())?;
//! client.authenticate(Arc::new(StaticCredentials::new(Credential::new("token"))));
//!
//! let cancel = CancellationToken::new();
//! let mut arrivals = client.watch("has:attachment", Duration::from_secs(30), cancel.clone());
//! while let Some(id) = arrivals.next().await {
//!     println!("new message {id}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::client::MessageClient;
use crate::error::Result;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Results fetched per baseline or poll search.
const SEARCH_LIMIT: usize = 100;

/// Detects messages that start matching a query.
///
/// The baseline only ever grows, so an ID is reported at most once per watcher.
#[derive(Debug)]
pub struct ChangeWatcher {
    client: MessageClient,
    query: String,
    interval: Duration,
    seen: HashSet<String>,
}

impl ChangeWatcher {
    /// Creates a watcher with an empty baseline.
    #[must_use]
    pub fn new(client: MessageClient, query: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            query: query.into(),
            interval,
            seen: HashSet::new(),
        }
    }

    /// The watched query.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Delay between polls.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of IDs in the baseline.
    #[must_use]
    pub fn baseline_len(&self) -> usize {
        self.seen.len()
    }

    /// Records the current results of the query as already seen.
    ///
    /// Returns the baseline size.
    ///
    /// # Errors
    ///
    /// Returns the search error; the baseline is left unchanged.
    #[instrument(name = "ChangeWatcher::establish_baseline", skip(self), fields(query = %self.query))]
    pub async fn establish_baseline(&mut self) -> Result<usize> {
        let ids = self.fetch().await?;
        self.seen.extend(ids);

        debug!(baseline = self.seen.len(), "Baseline established");
        Ok(self.seen.len())
    }

    /// Runs the query once and returns the IDs not seen before, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns the search error; the baseline is left unchanged.
    #[instrument(name = "ChangeWatcher::poll", skip(self), fields(query = %self.query))]
    pub async fn poll(&mut self) -> Result<Vec<String>> {
        let current = self.fetch().await?;

        let mut fresh: Vec<String> = current
            .into_iter()
            .filter(|id| !self.seen.contains(id))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();

        self.seen.extend(fresh.iter().cloned());

        if !fresh.is_empty() {
            debug!(new = fresh.len(), baseline = self.seen.len(), "New messages");
        }
        Ok(fresh)
    }

    /// Turns the watcher into an endless stream of new message IDs.
    ///
    /// The baseline is established first, retried every interval until it
    /// succeeds. Failed polls are logged and skipped. The stream ends as soon as
    /// `cancel` fires, at the next sleep or search.
    #[must_use]
    pub fn into_stream(self, cancel: CancellationToken) -> BoxStream<'static, String> {
        let state = WatchState {
            watcher: self,
            cancel,
            pending: VecDeque::new(),
            has_baseline: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.cancel.is_cancelled() {
                    debug!("Watch cancelled");
                    return None;
                }
                if let Some(id) = state.pending.pop_front() {
                    return Some((id, state));
                }
                state.step().await?;
            }
        })
        .boxed()
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        self.client
            .search(self.query.clone(), SEARCH_LIMIT)
            .try_collect()
            .await
    }
}

struct WatchState {
    watcher: ChangeWatcher,
    cancel: CancellationToken,
    pending: VecDeque<String>,
    has_baseline: bool,
}

impl WatchState {
    /// One baseline attempt or one sleep+poll cycle. `None` once cancelled.
    async fn step(&mut self) -> Option<()> {
        if !self.has_baseline {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                result = self.watcher.establish_baseline() => result,
            };

            match result {
                Ok(_) => {
                    self.has_baseline = true;
                    return Some(());
                }
                Err(e) => {
                    warn!(error = %e, "Failed to establish watch baseline, retrying");
                    return self.sleep().await;
                }
            }
        }

        self.sleep().await?;

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            result = self.watcher.poll() => result,
        };

        match result {
            Ok(fresh) => self.pending.extend(fresh),
            Err(e) => warn!(error = %e, "Watch poll failed, continuing"),
        }
        Some(())
    }

    async fn sleep(&self) -> Option<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            () = tokio::time::sleep(self.watcher.interval) => Some(()),
        }
    }
}
