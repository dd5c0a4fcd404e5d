//! Concurrency gate in front of every upstream call.
//!
//! [`RequestGate::execute`] is the single path through which requests reach the
//! provider. For each attempt it:
//!
//! 1. reserves quota units (rejecting locally when the daily budget is spent),
//! 2. waits for one of `C` permits, so at most `C` calls are ever in flight,
//! 3. runs the request and releases the permit,
//! 4. books the quota units and classifies the response.
//!
//! A `401` triggers one credential refresh and one re-run of the same request.
//! That allowance belongs to the single call; nothing is shared between callers.

use crate::api;
use crate::auth::{Credential, CredentialProvider};
use crate::error::{Error, Result};
use crate::quota::QuotaTracker;
use crate::transport::ApiResponse;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

/// Credential refreshes allowed per call.
const REAUTH_ATTEMPTS: u32 = 1;

const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded"];

/// Counters maintained by the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStatistics {
    /// Successful upstream calls.
    pub requests_made: u64,
    /// Quota units charged by successful calls.
    pub units_consumed: u64,
    /// Responses classified as rate limited.
    pub rate_limited: u64,
    /// Calls rejected locally or remotely for quota exhaustion.
    pub quota_rejections: u64,
    /// Credential refreshes triggered by `401` responses.
    pub reauthentications: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_made: AtomicU64,
    units_consumed: AtomicU64,
    rate_limited: AtomicU64,
    quota_rejections: AtomicU64,
    reauthentications: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// How a non-success response is treated.
#[derive(Debug)]
enum Outcome {
    Success(ApiResponse),
    Unauthorized,
    Failed(Error),
}

/// Bounds in-flight upstream calls and classifies their outcome.
///
/// Cloning is cheap; clones share permits, quota and statistics.
#[derive(Debug, Clone)]
pub struct RequestGate {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    quota: QuotaTracker,
    counters: Arc<Counters>,
}

impl RequestGate {
    /// Creates a gate admitting at most `concurrency` calls at once (minimum 1).
    #[must_use]
    pub fn new(concurrency: usize, quota: QuotaTracker) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            quota,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Maximum number of calls in flight.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency
    }

    /// The quota tracker consulted before each call.
    #[must_use]
    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Snapshot of the gate counters.
    #[must_use]
    pub fn statistics(&self) -> GateStatistics {
        let c = &self.counters;
        GateStatistics {
            requests_made: c.requests_made.load(Ordering::Relaxed),
            units_consumed: c.units_consumed.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            quota_rejections: c.quota_rejections.load(Ordering::Relaxed),
            reauthentications: c.reauthentications.load(Ordering::Relaxed),
        }
    }

    /// Runs `action` under the gate, charging `units` quota units.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] if `credentials` has no current credential
    /// - [`Error::QuotaExceeded`] if the budget is spent (locally or per the provider)
    /// - [`Error::Authentication`] if the credential is rejected after one refresh
    /// - [`Error::RateLimited`] / [`Error::Transient`] for retryable failures
    #[instrument(name = "RequestGate::execute", skip_all, fields(units = units))]
    pub async fn execute<F, Fut>(
        &self,
        units: u64,
        credentials: &dyn CredentialProvider,
        action: F,
    ) -> Result<ApiResponse>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = Result<ApiResponse>>,
    {
        let mut credential = credentials.current().await.ok_or(Error::NotAuthenticated)?;
        let mut reauth_budget = REAUTH_ATTEMPTS;

        loop {
            let response = self.attempt(units, credential, &action).await?;

            match self.classify(response, units) {
                Outcome::Success(response) => return Ok(response),
                Outcome::Failed(error) => return Err(error),
                Outcome::Unauthorized if reauth_budget > 0 => {
                    reauth_budget -= 1;
                    Counters::bump(&self.counters.reauthentications, 1);
                    debug!("Credential rejected, refreshing");

                    credential = credentials.refresh().await.map_err(|e| match e {
                        Error::Authentication { .. } => e,
                        other => Error::Authentication {
                            message: format!("credential refresh failed: {other}"),
                        },
                    })?;
                }
                Outcome::Unauthorized => {
                    warn!("Credential rejected again after refresh");
                    return Err(Error::Authentication {
                        message: "credential rejected after refresh".into(),
                    });
                }
            }
        }
    }

    /// One reserve → permit → call → commit cycle.
    async fn attempt<F, Fut>(
        &self,
        units: u64,
        credential: Credential,
        action: &F,
    ) -> Result<ApiResponse>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = Result<ApiResponse>>,
    {
        let reservation = self.quota.reserve(units).inspect_err(|_| {
            Counters::bump(&self.counters.quota_rejections, 1);
        })?;

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Transient {
                status: None,
                reason: None,
                message: "request gate closed".into(),
            })?;

        let result = action(credential).await;
        drop(permit);

        // Units are charged only when the provider actually answered.
        if result.is_ok() {
            reservation.commit();
        }
        result
    }

    fn classify(&self, response: ApiResponse, units: u64) -> Outcome {
        if response.is_success() {
            Counters::bump(&self.counters.requests_made, 1);
            Counters::bump(&self.counters.units_consumed, units);
            return Outcome::Success(response);
        }

        let outcome = classify_failure(response.status, &response.body, response.retry_after);

        match &outcome {
            Outcome::Failed(Error::RateLimited { .. }) => {
                Counters::bump(&self.counters.rate_limited, 1);
            }
            Outcome::Failed(Error::QuotaExceeded { .. }) => {
                Counters::bump(&self.counters.quota_rejections, 1);
            }
            _ => {}
        }

        match outcome {
            Outcome::Failed(Error::QuotaExceeded { .. }) => {
                let state = self.quota.current_status();
                warn!(
                    used = state.units_used_today,
                    limit = state.daily_limit,
                    "Provider reported quota exhaustion"
                );
                Outcome::Failed(Error::QuotaExceeded {
                    used: state.units_used_today,
                    limit: state.daily_limit,
                    requested: units,
                })
            }
            other => other,
        }
    }
}

/// Maps a non-2xx response onto the error taxonomy.
fn classify_failure(status: u16, body: &[u8], retry_after: Option<Duration>) -> Outcome {
    if status == 401 {
        return Outcome::Unauthorized;
    }

    let error = api::parse_error_body(body);
    let reason = error.reason().map(str::to_owned);
    let has_reason = |known: &[&str]| {
        reason
            .as_deref()
            .is_some_and(|r| known.iter().any(|k| k.eq_ignore_ascii_case(r)))
    };

    if status == 429 || (status == 403 && has_reason(RATE_LIMIT_REASONS)) {
        return Outcome::Failed(Error::RateLimited {
            retry_after,
            reason: reason.unwrap_or_else(|| "rateLimitExceeded".into()),
        });
    }

    if status == 403 && has_reason(QUOTA_REASONS) {
        return Outcome::Failed(Error::QuotaExceeded {
            used: 0,
            limit: 0,
            requested: 0,
        });
    }

    Outcome::Failed(Error::Transient {
        status: Some(status),
        reason,
        message: error.message,
    })
}
