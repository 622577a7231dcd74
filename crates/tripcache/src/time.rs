//! Conversions between persisted wall-clock timestamps and monotonic instants.
//!
//! Entries track liveness with [`tokio::time::Instant`] so that expiry can be
//! driven by a paused runtime clock. Persisted records only carry a wall-clock
//! creation time, which is mapped back onto the monotonic clock at load.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock age of `at`, or zero if `at` lies in the future.
pub fn wall_age(at: DateTime<Utc>) -> Duration {
    (Utc::now() - at).to_std().unwrap_or(Duration::ZERO)
}

/// Convert a wall-clock timestamp into an `Instant` the same age in the past.
///
/// Falls back to `Instant::now()` when the subtraction would underflow the
/// monotonic clock (for example shortly after boot).
pub fn wall_to_instant(at: DateTime<Utc>) -> Instant {
    let now = Instant::now();
    now.checked_sub(wall_age(at)).unwrap_or(now)
}

/// Convert an `Instant` into the corresponding wall-clock timestamp.
pub fn instant_to_wall(instant: Instant) -> DateTime<Utc> {
    let elapsed = Instant::now().saturating_duration_since(instant);
    chrono::Duration::from_std(elapsed)
        .map(|age| Utc::now() - age)
        .unwrap_or_else(|_| Utc::now())
}
