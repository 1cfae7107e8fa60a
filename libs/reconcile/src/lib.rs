//! Reconciliation primitives for elastic workers.
//!
//! This library provides the time-dependent pieces of worker garbage
//! collection, kept free of any cluster or server types so they can be
//! tested deterministically:
//!
//! - **Clock**: an injectable source of "now".
//! - **Grace period**: how long a worker may stay unregistered before it is
//!   considered stale.
//! - **Partitioning**: splitting workers into registered and unregistered.
//!
//! # Invariants
//!
//! - Staleness is strict: a worker is stale only once `now` is *after*
//!   `created_at + period`, never at the boundary itself.
//! - Decisions are deterministic given the same inputs.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Returns true if a worker created at `created_at` has outlived `period`.
///
/// A deadline that overflows the representable range is never reached.
pub fn is_past_grace_period(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    period: TimeDelta,
) -> bool {
    match created_at.checked_add_signed(period) {
        Some(deadline) => now > deadline,
        None => false,
    }
}

/// Convert a grace period in whole minutes to a [`TimeDelta`].
pub fn grace_period_from_minutes(minutes: u32) -> TimeDelta {
    TimeDelta::minutes(i64::from(minutes))
}

/// Split workers into (registered, unregistered).
pub fn partition_by_registration<I, F>(workers: I, is_registered: F) -> (Vec<I::Item>, Vec<I::Item>)
where
    I: IntoIterator,
    F: Fn(&I::Item) -> bool,
{
    let mut registered = Vec::new();
    let mut unregistered = Vec::new();

    for worker in workers {
        if is_registered(&worker) {
            registered.push(worker);
        } else {
            unregistered.push(worker);
        }
    }

    (registered, unregistered)
}

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default auto-register grace period in minutes.
pub const DEFAULT_AUTO_REGISTER_TIMEOUT_MINUTES: u32 = 10;
