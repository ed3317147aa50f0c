//! Calendar event types shared by the client and the tool dispatcher.

use availability_engine::{localize, DstPolicy, TimeInterval};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Start or end of an event: a timed instant, or a whole day for all-day events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
}

impl EventTime {
    /// Resolve to an instant; all-day dates start at local midnight in `tz`.
    pub fn resolve(&self, tz: Tz) -> Option<DateTime<FixedOffset>> {
        match self {
            EventTime::DateTime(dt) => Some(*dt),
            EventTime::Date(date) => localize(
                &tz,
                date.and_time(NaiveTime::MIN),
                DstPolicy::ShiftForward,
            )
            .map(|dt| dt.fixed_offset()),
        }
    }
}

impl std::fmt::Display for EventTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventTime::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            EventTime::Date(date) => write!(f, "{date}"),
        }
    }
}

/// A calendar event as returned by the Calendar API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        matches!(self.start, EventTime::Date(_))
    }

    /// The event's time span, or `None` if it resolves to an empty range.
    pub fn interval(&self, tz: Tz) -> Option<TimeInterval> {
        let start = self.start.resolve(tz)?;
        let end = self.end.resolve(tz)?;
        TimeInterval::new(start, end).ok()
    }

    /// One-line summary including the ID, for use in later updates.
    pub fn summary_line(&self) -> String {
        let title = self.summary.as_deref().unwrap_or("(No title)");
        let location = match self.location.as_deref() {
            Some(loc) if !loc.is_empty() => format!(" @ {loc}"),
            _ => String::new(),
        };
        format!(
            "ID: {} | {} | {} - {}{}",
            self.id, title, self.start, self.end, location
        )
    }
}

/// An event paired with its resolved interval, for engine lookups.
#[derive(Debug, Clone)]
pub struct LocatedEvent {
    pub interval: TimeInterval,
    pub event: CalendarEvent,
}

impl LocatedEvent {
    pub fn new(event: CalendarEvent, tz: Tz) -> Option<Self> {
        let interval = event.interval(tz)?;
        Some(Self { interval, event })
    }
}

impl AsRef<TimeInterval> for LocatedEvent {
    fn as_ref(&self) -> &TimeInterval {
        &self.interval
    }
}

/// A new timed event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRequest {
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub description: Option<String>,
    pub location: Option<String>,
    /// IANA name sent alongside the timestamps so the event shows in the
    /// intended zone.
    pub time_zone: Option<String>,
}

/// A partial update; only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub time_zone: Option<String>,
}

impl EventUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.start.is_none()
            && self.end.is_none()
    }
}
