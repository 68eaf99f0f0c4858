//! Wraparound-safe time arithmetic
//!
//! All deadline, counter, and metric arithmetic in the interpreter goes
//! through these checked routines. Overflow or underflow raises
//! `TimeWraparound` instead of wrapping silently.
//!
//! Monotonic-clock comparisons never fail: a backwards jump is logged and
//! counted, and the reading is clamped to the last known-good value.

use crate::error::{CoreError, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Process-wide count of observed backwards monotonic jumps (diagnostics).
static BACKWARDS_JUMPS: AtomicU64 = AtomicU64::new(0);

/// Checked addition over time quantities (nanos, micros, millis).
pub fn checked_add(a: i64, b: i64) -> Result<i64, CoreError> {
    a.checked_add(b).ok_or_else(|| {
        CoreError::new(
            ErrorKind::TimeWraparound,
            format!("time arithmetic overflow: {} + {}", a, b),
        )
    })
}

/// Checked subtraction over time quantities.
pub fn checked_sub(a: i64, b: i64) -> Result<i64, CoreError> {
    a.checked_sub(b).ok_or_else(|| {
        CoreError::new(
            ErrorKind::TimeWraparound,
            format!("time arithmetic underflow: {} - {}", a, b),
        )
    })
}

/// Checked multiplication, for unit conversions (seconds to nanos etc.).
pub fn checked_mul(a: i64, b: i64) -> Result<i64, CoreError> {
    a.checked_mul(b).ok_or_else(|| {
        CoreError::new(
            ErrorKind::TimeWraparound,
            format!("time arithmetic overflow: {} * {}", a, b),
        )
    })
}

/// A deadline anchored to the monotonic clock.
///
/// Used for guest-subprocess timeouts. `remaining()` never goes negative
/// and `expired()` never wraps, whatever the platform clock does.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Start a deadline `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Deadline {
            start: Instant::now(),
            limit,
        }
    }

    /// Seconds-based constructor, validating against Duration overflow.
    pub fn after_secs(secs: u64) -> Result<Self, CoreError> {
        // Duration::from_secs saturates internally only on 128-bit nanos;
        // reject anything that cannot round-trip through nanoseconds.
        let nanos = checked_mul(
            i64::try_from(secs).map_err(|_| {
                CoreError::new(
                    ErrorKind::TimeWraparound,
                    format!("timeout of {} seconds does not fit in i64", secs),
                )
            })?,
            1_000_000_000,
        )?;
        Ok(Deadline::after(Duration::from_nanos(nanos as u64)))
    }

    /// Has the deadline passed?
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.limit
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.start.elapsed())
    }

    /// Elapsed time since the deadline was armed.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Monotonic clock wrapper that flags backwards jumps.
///
/// `Instant` is monotonic on every platform Rust supports, but readings
/// funneled in from guest processes or coarse OS counters may not be. Any
/// observation earlier than the previous one is logged, counted, and
/// clamped; it is never an error.
#[derive(Debug)]
pub struct MonotonicClock {
    last_nanos: u64,
    base: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            last_nanos: 0,
            base: Instant::now(),
        }
    }

    /// Current reading in nanoseconds since the clock was created,
    /// clamped to be non-decreasing.
    pub fn now_nanos(&mut self) -> u64 {
        let raw = self.base.elapsed().as_nanos().try_into().unwrap_or(u64::MAX);
        self.observe(raw)
    }

    /// Feed an external monotonic observation (e.g. from a guest report).
    /// Returns the clamped, non-decreasing value.
    pub fn observe(&mut self, nanos: u64) -> u64 {
        if nanos < self.last_nanos {
            BACKWARDS_JUMPS.fetch_add(1, Ordering::Relaxed);
            warn!(
                last = self.last_nanos,
                observed = nanos,
                "monotonic clock moved backwards; clamping"
            );
            return self.last_nanos;
        }
        self.last_nanos = nanos;
        nanos
    }
}

/// Total backwards jumps seen process-wide since startup.
pub fn backwards_jump_count() -> u64 {
    BACKWARDS_JUMPS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_ok() {
        assert_eq!(checked_add(1_000_000, 500).unwrap(), 1_000_500);
    }

    #[test]
    fn test_checked_add_overflow() {
        let err = checked_add(i64::MAX, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimeWraparound);
    }

    #[test]
    fn test_checked_sub_underflow() {
        let err = checked_sub(i64::MIN, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimeWraparound);
    }

    #[test]
    fn test_checked_mul_overflow() {
        let err = checked_mul(i64::MAX, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimeWraparound);
    }

    #[test]
    fn test_deadline_not_expired_immediately() {
        let d = Deadline::after(Duration::from_secs(30));
        assert!(!d.expired());
        assert!(d.remaining() > Duration::from_secs(29));
    }

    #[test]
    fn test_deadline_expires() {
        let d = Deadline::after(Duration::from_millis(0));
        assert!(d.expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_deadline_after_secs_rejects_huge_timeout() {
        assert!(Deadline::after_secs(u64::MAX).is_err());
        assert!(Deadline::after_secs(30).is_ok());
    }

    #[test]
    fn test_monotonic_clamps_backwards_jump() {
        let mut clock = MonotonicClock::new();
        assert_eq!(clock.observe(100), 100);
        assert_eq!(clock.observe(50), 100); // clamped
        assert_eq!(clock.observe(150), 150);
    }

    #[test]
    fn test_now_nanos_is_nondecreasing() {
        let mut clock = MonotonicClock::new();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }
}
