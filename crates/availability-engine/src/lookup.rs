//! Point-in-time lookup over busy intervals or anything carrying one.

use chrono::{DateTime, FixedOffset};

use crate::interval::TimeInterval;

/// Return the items whose interval contains `at`, preserving input order.
///
/// Intervals are half-open: an item starting exactly at `at` is included, an
/// item ending exactly at `at` is not.
pub fn intervals_at<T: AsRef<TimeInterval>>(at: DateTime<FixedOffset>, items: &[T]) -> Vec<&T> {
    items
        .iter()
        .filter(|item| item.as_ref().contains(at))
        .collect()
}
