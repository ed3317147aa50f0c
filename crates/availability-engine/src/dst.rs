//! DST-aware localisation of wall-clock times.

use chrono::{DateTime, Duration, NaiveDateTime, Offset, TimeZone};

/// Policy for wall-clock times that fall into a DST gap (e.g. 02:30 on a
/// spring-forward night). Ambiguous times (fall-back) always resolve to the
/// earlier instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DstPolicy {
    /// Drop the time entirely.
    Skip,
    /// Move forward by the length of the gap (02:30 in a 02:00-03:00 gap becomes 03:30).
    #[default]
    ShiftForward,
}

/// Resolve a naive wall-clock time in `tz` to a concrete instant.
///
/// Returns `None` only when the time falls in a gap and `policy` is [`DstPolicy::Skip`].
pub fn localize<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
    policy: DstPolicy,
) -> Option<DateTime<Tz>> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Some(dt);
    }
    match policy {
        DstPolicy::Skip => None,
        DstPolicy::ShiftForward => {
            // Interpret the wall time with the offset in force before the gap.
            let before = tz
                .offset_from_utc_datetime(&(naive - Duration::days(1)))
                .fix();
            let utc = naive - Duration::seconds(i64::from(before.local_minus_utc()));
            Some(tz.from_utc_datetime(&utc))
        }
    }
}
