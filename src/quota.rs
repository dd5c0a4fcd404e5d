//! Daily quota accounting.
//!
//! The provider charges a number of quota units per call and enforces a daily
//! budget. [`QuotaTracker`] mirrors that budget locally so exhaustion is
//! detected before a request is sent.
//!
//! Reservation is two-phase: [`QuotaTracker::reserve`] holds units as
//! in-flight, [`QuotaReservation::commit`] books them as used. Held units count
//! against the budget, so concurrent callers cannot overspend it. Dropping a
//! reservation without committing releases the held units.
//!
//! The window is reset lazily: every reservation checks whether the reset
//! boundary has passed. No background timer is involved.
//!
//! ```
//! use mail_access::QuotaTracker;
//!
//! let tracker = QuotaTracker::new(100);
//! let reservation = tracker.reserve(10).expect("within budget");
//! reservation.commit();
//! assert_eq!(tracker.current_status().units_used_today, 10);
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Snapshot of the daily quota window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    /// Units booked in the current window.
    pub units_used_today: u64,
    /// Daily budget.
    pub daily_limit: u64,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Window {
    used: u64,
    in_flight: u64,
    limit: u64,
    reset_at: DateTime<Utc>,
}

impl Window {
    fn roll(&mut self, now: DateTime<Utc>) {
        if now < self.reset_at {
            return;
        }

        let elapsed_days = (now - self.reset_at).num_days() + 1;
        self.reset_at += Duration::days(elapsed_days);

        debug!(
            units_used = self.used,
            reset_at = %self.reset_at,
            "Quota window reset"
        );
        self.used = 0;
    }

    fn state(&self) -> QuotaState {
        QuotaState {
            units_used_today: self.used,
            daily_limit: self.limit,
            reset_at: self.reset_at,
        }
    }
}

/// Tracks quota units consumed against a daily budget.
///
/// Cloning is cheap and every clone shares the same window.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    window: Arc<Mutex<Window>>,
}

impl QuotaTracker {
    /// Creates a tracker whose first window ends 24 hours from now.
    #[must_use]
    pub fn new(daily_limit: u64) -> Self {
        Self::starting_at(daily_limit, Utc::now())
    }

    /// Creates a tracker whose first window starts at `now`.
    #[must_use]
    pub fn starting_at(daily_limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window {
                used: 0,
                in_flight: 0,
                limit: daily_limit,
                reset_at: now + Duration::days(1),
            })),
        }
    }

    /// Holds `units` against the budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] if the units do not fit in what is left of
    /// today's budget. A rejection changes nothing.
    pub fn reserve(&self, units: u64) -> Result<QuotaReservation> {
        self.reserve_at(units, Utc::now())
    }

    /// Same as [`reserve`](Self::reserve) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] if the budget would be exceeded.
    pub fn reserve_at(&self, units: u64, now: DateTime<Utc>) -> Result<QuotaReservation> {
        let mut window = self.lock();
        window.roll(now);

        let committed = window.used.saturating_add(window.in_flight);
        if committed
            .checked_add(units)
            .map_or(true, |total| total > window.limit)
        {
            warn!(
                used = window.used,
                in_flight = window.in_flight,
                limit = window.limit,
                requested = units,
                "Quota reservation rejected"
            );
            return Err(Error::QuotaExceeded {
                used: committed,
                limit: window.limit,
                requested: units,
            });
        }

        window.in_flight += units;
        Ok(QuotaReservation {
            window: Arc::clone(&self.window),
            units,
            settled: false,
        })
    }

    /// Returns the current window.
    #[must_use]
    pub fn current_status(&self) -> QuotaState {
        self.current_status_at(Utc::now())
    }

    /// Same as [`current_status`](Self::current_status) with an explicit clock.
    #[must_use]
    pub fn current_status_at(&self, now: DateTime<Utc>) -> QuotaState {
        let mut window = self.lock();
        window.roll(now);
        window.state()
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Units held by [`QuotaTracker::reserve`].
///
/// Call [`commit`](Self::commit) once the request has been sent. Dropping the
/// reservation instead releases the units.
#[derive(Debug)]
#[must_use = "dropping a reservation releases its units"]
pub struct QuotaReservation {
    window: Arc<Mutex<Window>>,
    units: u64,
    settled: bool,
}

impl QuotaReservation {
    /// Number of units held.
    #[must_use]
    pub fn units(&self) -> u64 {
        self.units
    }

    /// Books the held units as used.
    pub fn commit(mut self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.in_flight = window.in_flight.saturating_sub(self.units);
        window.used += self.units;
        self.settled = true;
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.in_flight = window.in_flight.saturating_sub(self.units);
    }
}
