//! Time-related utilities with clock abstraction for testability.

use chrono::{DateTime, TimeZone, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get the current Unix timestamp in UTC (milliseconds)
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        epoch_millis()
    }
}

/// Fixed clock implementation for testing (returns a settable time)
#[derive(Debug)]
pub struct FixedClock {
    fixed_time: std::sync::atomic::AtomicI64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: std::sync::atomic::AtomicI64::new(fixed_time_millis),
        }
    }

    /// Move the clock to a new timestamp (may go backwards)
    pub fn set(&self, fixed_time_millis: i64) {
        self.fixed_time
            .store(fixed_time_millis, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.fixed_time.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Get the current Unix timestamp in UTC (milliseconds)
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a Unix timestamp (milliseconds) to UTC RFC 3339 format
pub fn millis_to_rfc3339(timestamp_millis: i64) -> String {
    let seconds = timestamp_millis.div_euclid(1000);
    let nanos = (timestamp_millis.rem_euclid(1000) * 1_000_000) as u32;
    let dt: DateTime<Utc> = match Utc.timestamp_opt(seconds, nanos) {
        chrono::LocalResult::Single(dt) => dt,
        _ => Utc.timestamp_opt(0, 0).unwrap(),
    };
    dt.to_rfc3339()
}
