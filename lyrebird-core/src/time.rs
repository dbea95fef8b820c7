//! Time and duration conversion utilities.
//!
//! Positions travel through the engine as [`Duration`], but the catalog stores
//! milliseconds and the transport API accepts signed millisecond offsets.
//! These helpers make every narrowing conversion saturate explicitly.

use std::time::Duration;

/// Extension trait for saturating Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;

    /// Convert duration to milliseconds as i64, saturating at `i64::MAX`.
    ///
    /// Used for database storage, where SQLite integers are signed.
    fn as_millis_i64(&self) -> i64;

    /// Render as `m:ss` for terminal output.
    fn format_clock(&self) -> String;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }

    fn as_millis_i64(&self) -> i64 {
        i64::try_from(self.as_millis()).unwrap_or(i64::MAX)
    }

    fn format_clock(&self) -> String {
        let secs = self.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Clamp a signed millisecond offset into `[0, max]`.
///
/// Negative input maps to zero; anything past `max` maps to `max`.
#[must_use]
pub fn clamp_millis(millis: i64, max: Duration) -> Duration {
    let millis = u64::try_from(millis).unwrap_or(0);
    Duration::from_millis(millis).min(max)
}

/// Build a duration from a signed millisecond value read from storage.
#[must_use]
pub fn millis_from_i64(millis: i64) -> Duration {
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}
