//! Working-hours policy: which part of which days is open for scheduling.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;

use crate::dst::{localize, DstPolicy};
use crate::error::{EngineError, Result};

/// Monday through Friday.
pub const WORKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// The recurring daily window considered available, in an explicit timezone.
///
/// Fields are public so callers can assemble a policy from configuration;
/// [`WorkingHoursPolicy::validate`] is run by every engine entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingHoursPolicy {
    pub daily_start: NaiveTime,
    pub daily_end: NaiveTime,
    pub days_of_week: HashSet<Weekday>,
    /// Timezone in which `daily_start`/`daily_end` and day boundaries are read.
    pub timezone: Tz,
    /// How a window bound that lands in a DST gap is resolved.
    pub dst: DstPolicy,
}

impl Default for WorkingHoursPolicy {
    /// Monday–Friday, 09:00–17:00 UTC.
    fn default() -> Self {
        Self {
            daily_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            daily_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            days_of_week: WORKDAYS.into_iter().collect(),
            timezone: Tz::UTC,
            dst: DstPolicy::default(),
        }
    }
}

impl WorkingHoursPolicy {
    /// Build a validated policy.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPolicy` if `days_of_week` is empty or
    /// `daily_start` is not before `daily_end`.
    pub fn new(
        daily_start: NaiveTime,
        daily_end: NaiveTime,
        days_of_week: impl IntoIterator<Item = Weekday>,
        timezone: Tz,
    ) -> Result<Self> {
        let policy = Self {
            daily_start,
            daily_end,
            days_of_week: days_of_week.into_iter().collect(),
            timezone,
            dst: DstPolicy::default(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Same days and timezone, different hours.
    pub fn with_hours(&self, daily_start: NaiveTime, daily_end: NaiveTime) -> Result<Self> {
        let policy = Self {
            daily_start,
            daily_end,
            ..self.clone()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_dst_policy(mut self, dst: DstPolicy) -> Self {
        self.dst = dst;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.days_of_week.is_empty() {
            return Err(EngineError::InvalidPolicy(
                "days_of_week must not be empty".to_string(),
            ));
        }
        if self.daily_start >= self.daily_end {
            return Err(EngineError::InvalidPolicy(format!(
                "daily_start {} must be before daily_end {}",
                self.daily_start, self.daily_end
            )));
        }
        Ok(())
    }

    pub fn applies_to(&self, date: NaiveDate) -> bool {
        self.days_of_week.contains(&date.weekday())
    }

    /// The unclipped working window for `date`, or `None` when the policy does
    /// not cover that weekday or a bound is dropped by [`DstPolicy::Skip`].
    pub fn window_on(
        &self,
        date: NaiveDate,
    ) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        if !self.applies_to(date) {
            return None;
        }
        let start = localize(&self.timezone, date.and_time(self.daily_start), self.dst)?;
        let end = localize(&self.timezone, date.and_time(self.daily_end), self.dst)?;
        Some((start.fixed_offset(), end.fixed_offset()))
    }

    /// Re-express an instant in this policy's timezone.
    pub(crate) fn to_local(&self, at: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.timezone).fixed_offset()
    }
}
