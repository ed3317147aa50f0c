//! Half-open time intervals with explicit UTC offsets.

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A half-open interval `[start, end)` with `start < end`.
///
/// Both endpoints carry their own UTC offset. Comparisons are by instant, so
/// intervals reported in different offsets order and merge correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct TimeInterval {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl TryFrom<RawInterval> for TimeInterval {
    type Error = EngineError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        TimeInterval::new(raw.start, raw.end)
    }
}

impl TimeInterval {
    /// Build an interval, rejecting empty and inverted ranges.
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Self> {
        if start >= end {
            return Err(EngineError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// `start <= at < end`.
    pub fn contains(&self, at: DateTime<FixedOffset>) -> bool {
        self.start <= at && at < self.end
    }

    /// True when the two intervals share at least one instant.
    ///
    /// Adjacent intervals (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl AsRef<TimeInterval> for TimeInterval {
    fn as_ref(&self) -> &TimeInterval {
        self
    }
}
