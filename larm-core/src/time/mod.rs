//! ## larm-core::time
//! **Clocks**
//!
//! Every delay in the alerting engine is computed against a [`Clock`] so the
//! same state machine runs against wall time in production and against a
//! [`VirtualClock`] in tests and replays.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A deterministic clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    // Milliseconds since the unix epoch.
    offset: Arc<AtomicI64>,
}

impl VirtualClock {
    /// Creates a clock starting at `start_ms` milliseconds since the epoch.
    pub fn new(start_ms: i64) -> Self {
        Self {
            offset: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn advance(&self, by: Duration) {
        self.offset
            .fetch_add(by.as_millis() as i64, Ordering::AcqRel);
    }

    pub fn set_ms(&self, ms: i64) {
        self.offset.store(ms, Ordering::Release);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_default()
    }
}

/// Converts a configuration delay in milliseconds to a chrono duration.
#[inline]
pub fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(ms.min(i64::MAX as u64) as i64)
}

/// `at + delay`, saturating at the latest representable instant.
#[inline]
pub fn after(at: DateTime<Utc>, delay: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `deadline`, zero when it already passed.
pub fn until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}
