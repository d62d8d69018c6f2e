//! Grace period policy
//!
//! How long a soft-deleted resource is left to its owning controller before
//! the uninstaller strips its finalizer. The period only ever shrinks; once
//! no cooperating controller remains it is pinned to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::DEFAULT_GRACE_PERIOD;

/// Shared, shrink-only grace period
#[derive(Debug)]
pub struct GracePeriod {
    millis: AtomicU64,
}

impl GracePeriod {
    pub fn new(period: Duration) -> Self {
        Self {
            millis: AtomicU64::new(period.as_millis() as u64),
        }
    }

    /// Current period; read at every comparison since a pass may shorten it
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Acquire))
    }

    /// Shorten the period to `period`; longer values are ignored
    pub fn shorten_to(&self, period: Duration) {
        self.millis
            .fetch_min(period.as_millis() as u64, Ordering::AcqRel);
    }

    /// Pin the period to zero
    pub fn expire(&self) {
        self.shorten_to(Duration::ZERO);
    }

    /// Whether an object soft-deleted at `deleted_at` has outlived the period
    pub fn has_elapsed(&self, deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Ok(period) = chrono::Duration::from_std(self.current()) else {
            return false;
        };
        deleted_at < now - period
    }
}

impl Default for GracePeriod {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}
