//! Compute free time slots inside working hours from a set of busy intervals.
//!
//! Busy intervals are sorted and merged first, then each day's working window
//! (clipped to the requested range) has the merged intervals subtracted from it.

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::interval::TimeInterval;
use crate::policy::WorkingHoursPolicy;

/// A free time slot inside working hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_minutes: i64,
}

impl FreeSlot {
    fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self {
            start,
            end,
            duration_minutes: (end - start).num_minutes(),
        }
    }
}

/// Merge overlapping or adjacent busy intervals.
///
/// Returns a sorted list of maximal disjoint intervals. Merging an already
/// sorted, disjoint, non-adjacent list returns it unchanged.
pub fn merge_busy(busy: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut sorted = busy.to_vec();
    // Sort by start, then end, so ties are ordered deterministically.
    sorted.sort_by_key(|i| (i.start(), i.end()));

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = merged.last_mut() {
            if interval.start() <= last.end() {
                if interval.end() > last.end() {
                    // Extending keeps start < end, so this cannot fail.
                    *last = TimeInterval::new(last.start(), interval.end())
                        .unwrap_or(*last);
                }
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

/// Compute the free slots within `[range_start, range_end)`.
///
/// Each day (in the policy timezone) from `range_start`'s date through
/// `range_end`'s date whose weekday is in the policy contributes its working
/// window, clipped to the range, minus every busy interval. Slots are returned
/// sorted by start and expressed in the policy timezone.
///
/// # Errors
/// Returns `EngineError::InvalidRange` if `range_start >= range_end` and
/// `EngineError::InvalidPolicy` if the policy fails validation.
pub fn compute_free_slots(
    range_start: DateTime<FixedOffset>,
    range_end: DateTime<FixedOffset>,
    busy: &[TimeInterval],
    policy: &WorkingHoursPolicy,
) -> Result<Vec<FreeSlot>> {
    if range_start >= range_end {
        return Err(EngineError::InvalidRange {
            start: range_start,
            end: range_end,
        });
    }
    policy.validate()?;

    let merged = merge_busy(busy);
    let first_day = range_start.with_timezone(&policy.timezone).date_naive();
    let last_day = range_end.with_timezone(&policy.timezone).date_naive();

    let mut slots = Vec::new();
    for day in first_day.iter_days().take_while(|d| *d <= last_day) {
        let Some((window_start, window_end)) = policy.window_on(day) else {
            continue;
        };
        let window_start = window_start.max(range_start);
        let window_end = window_end.min(range_end);
        if window_start >= window_end {
            continue;
        }
        subtract_busy(&merged, window_start, window_end, policy, &mut slots);
    }
    Ok(slots)
}

/// Like [`compute_free_slots`], dropping slots shorter than `min_duration`.
pub fn compute_free_slots_with_min_duration(
    range_start: DateTime<FixedOffset>,
    range_end: DateTime<FixedOffset>,
    busy: &[TimeInterval],
    policy: &WorkingHoursPolicy,
    min_duration: Duration,
) -> Result<Vec<FreeSlot>> {
    let slots = compute_free_slots(range_start, range_end, busy, policy)?;
    Ok(slots
        .into_iter()
        .filter(|slot| slot.end - slot.start >= min_duration)
        .collect())
}

/// The earliest free slot at least `min_duration` long, if any.
pub fn first_free_slot(
    range_start: DateTime<FixedOffset>,
    range_end: DateTime<FixedOffset>,
    busy: &[TimeInterval],
    policy: &WorkingHoursPolicy,
    min_duration: Duration,
) -> Result<Option<FreeSlot>> {
    Ok(
        compute_free_slots_with_min_duration(range_start, range_end, busy, policy, min_duration)?
            .into_iter()
            .next(),
    )
}

/// Push the parts of `[window_start, window_end)` not covered by `merged`.
fn subtract_busy(
    merged: &[TimeInterval],
    window_start: DateTime<FixedOffset>,
    window_end: DateTime<FixedOffset>,
    policy: &WorkingHoursPolicy,
    out: &mut Vec<FreeSlot>,
) {
    // Skip busy intervals that end before the window opens.
    let first = merged.partition_point(|b| b.end() <= window_start);

    let mut cursor = window_start;
    for busy in &merged[first..] {
        if busy.start() >= window_end {
            break;
        }
        if cursor < busy.start() {
            out.push(FreeSlot::new(
                policy.to_local(cursor),
                policy.to_local(busy.start()),
            ));
        }
        cursor = cursor.max(busy.end());
    }

    if cursor < window_end {
        out.push(FreeSlot::new(
            policy.to_local(cursor),
            policy.to_local(window_end),
        ));
    }
}
