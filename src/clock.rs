//! Time sources for the simulation.
//!
//! Every duration in the core is computed from elapsed time between two
//! [`Timestamp`]s, never from how often the engine happens to be polled.
//! The [`Clock`] trait is the single source of "now": production code uses
//! [`SystemClock`] (optionally accelerated), tests and replays drive a
//! [`ManualClock`] by hand.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds in one hour. Production rates are expressed per hour.
pub const SECONDS_PER_HOUR: u64 = 3600;

/// An instant on the simulation timeline, in whole seconds since the epoch.
///
/// Natural `u64` ordering equals chronological ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch.
    pub const ZERO: Self = Self(0);

    /// Create a timestamp from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Create a timestamp from whole hours (handy in tests and scenarios).
    #[must_use]
    pub const fn from_hours(hours: u64) -> Self {
        Self(hours * SECONDS_PER_HOUR)
    }

    /// Seconds since the epoch.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// This instant shifted forward by `secs`, saturating at the far future.
    #[must_use]
    pub const fn plus_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Seconds elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub const fn secs_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0;
        write!(
            f,
            "{}d{:02}:{:02}:{:02}",
            secs / 86_400,
            (secs % 86_400) / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

/// Source of the current simulation instant.
pub trait Clock: Send + Sync {
    /// The current instant. Successive calls never go backwards.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time, optionally accelerated by an integer factor.
///
/// With a factor of `n`, one real second advances the simulation by `n`
/// seconds, starting from the wall-clock instant the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Timestamp,
    started: Instant,
    acceleration: u64,
}

impl SystemClock {
    /// A real-time clock.
    #[must_use]
    pub fn new() -> Self {
        Self::accelerated(1)
    }

    /// A clock running `factor` times faster than real time.
    ///
    /// A factor of zero is treated as one.
    #[must_use]
    pub fn accelerated(factor: u64) -> Self {
        let origin = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            origin: Timestamp::from_secs(origin),
            started: Instant::now(),
            acceleration: factor.max(1),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.started.elapsed().as_secs();
        self.origin
            .plus_secs(elapsed.saturating_mul(self.acceleration))
    }
}

/// A hand-driven clock for tests, replays and batch simulation.
///
/// Clones share the same underlying instant, so a test can keep one handle
/// while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// A clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start.as_secs())),
        }
    }

    /// Move the clock forward by `secs`, saturating at the end of time.
    pub fn advance(&self, secs: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| Some(now.saturating_add(secs)));
    }

    /// Jump to `instant`. Requests to move backwards are ignored.
    pub fn set(&self, instant: Timestamp) {
        self.now.fetch_max(instant.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.now.load(Ordering::SeqCst))
    }
}
