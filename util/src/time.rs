//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Number of microseconds in a second
pub const MICROS_PER_SECOND: f64 = 1e6;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a microsecond timestamp, as carried in messages, into seconds.
pub fn utime_to_seconds(utime: i64) -> f64 {
    utime as f64 / MICROS_PER_SECOND
}
