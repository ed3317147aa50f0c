//! Calendar tools: argument parsing, validation and orchestration.
//!
//! [`CalendarTools`] turns assistant-facing arguments (ISO 8601 strings,
//! minute counts) into typed requests, calls the [`CalendarClient`] and the
//! availability engine, and maps every failure into a [`ToolError`]. It has no
//! MCP types in it, so it can be driven directly from tests or the CLI.

use std::sync::Arc;

use availability_engine::{
    compute_free_slots_with_min_duration, intervals_at, localize, DstPolicy, FreeSlot,
    WorkingHoursPolicy,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::client::{CalendarClient, EventQuery};
use crate::error::{ClientError, ToolError};
use crate::model::{CalendarEvent, EventRequest, EventUpdate, LocatedEvent};

pub type Result<T> = std::result::Result<T, ToolError>;

pub const DEFAULT_DURATION_MINUTES: i64 = 60;
pub const DEFAULT_MIN_SLOT_MINUTES: i64 = 30;
pub const DEFAULT_MAX_RESULTS: u32 = 10;
/// Upper bound the Calendar API accepts for `maxResults`.
pub const MAX_RESULTS_LIMIT: u32 = 2500;
/// Longest event length or minimum slot accepted: one leap year.
pub const MAX_DURATION_MINUTES: i64 = 366 * 24 * 60;

/// Defaults applied when a tool call leaves them out.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub calendar_id: String,
    /// Overrides the calendar's own timezone setting.
    pub timezone: Option<Tz>,
    /// Hours and days for `get_free_slots`; its timezone is replaced by the
    /// resolved one on every call.
    pub working_hours: WorkingHoursPolicy,
    pub now: fn() -> DateTime<Utc>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            timezone: None,
            working_hours: WorkingHoursPolicy::default(),
            now: Utc::now,
        }
    }
}

/// Result of a create or update.
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub message: String,
    pub event: CalendarEvent,
}

/// Result of an event lookup or listing.
#[derive(Debug, Clone, Serialize)]
pub struct EventListing {
    pub message: String,
    /// `ID: ... | title | start - end` lines, in the same order as `events`.
    pub summaries: Vec<String>,
    pub events: Vec<CalendarEvent>,
}

impl EventListing {
    fn new(message: String, events: Vec<CalendarEvent>) -> Self {
        Self {
            message,
            summaries: events.iter().map(CalendarEvent::summary_line).collect(),
            events,
        }
    }
}

/// Result of `get_free_slots`.
#[derive(Debug, Clone, Serialize)]
pub struct FreeSlotReport {
    pub message: String,
    pub timezone: String,
    pub min_duration_minutes: i64,
    pub working_hours_start: NaiveTime,
    pub working_hours_end: NaiveTime,
    pub slots: Vec<FreeSlot>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateEventArgs {
    pub title: String,
    pub start_time: String,
    pub duration_minutes: Option<i64>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub calendar_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateEventArgs {
    pub event_id: String,
    pub title: Option<String>,
    pub start_time: Option<String>,
    pub duration_minutes: Option<i64>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub calendar_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FreeSlotsArgs {
    pub start_date: String,
    pub end_date: String,
    pub min_duration_minutes: Option<i64>,
    /// Whole hour, 0-23.
    pub working_hours_start: Option<u32>,
    /// Whole hour, 0-23. Must be after the start hour.
    pub working_hours_end: Option<u32>,
    pub calendar_id: Option<String>,
}

/// The five calendar tools over a shared [`CalendarClient`].
pub struct CalendarTools {
    client: Arc<dyn CalendarClient>,
    settings: ToolSettings,
    /// The calendar's timezone, fetched once on first successful lookup.
    remote_timezone: OnceCell<Tz>,
}

impl CalendarTools {
    pub fn new(client: Arc<dyn CalendarClient>, settings: ToolSettings) -> Self {
        Self {
            client,
            settings,
            remote_timezone: OnceCell::new(),
        }
    }

    /// Configured timezone, else the calendar's setting, else UTC.
    pub async fn timezone(&self) -> Result<Tz> {
        if let Some(tz) = self.settings.timezone {
            return Ok(tz);
        }
        let resolved = self
            .remote_timezone
            .get_or_try_init(|| async {
                let name = self.client.user_timezone().await?;
                let tz = name.parse::<Tz>().unwrap_or_else(|_| {
                    warn!(timezone = %name, "Calendar timezone not recognised, using UTC");
                    Tz::UTC
                });
                debug!(timezone = %tz, "Using calendar timezone");
                Ok::<Tz, ClientError>(tz)
            })
            .await;
        match resolved {
            Ok(tz) => Ok(*tz),
            Err(e) => match ToolError::from(e) {
                ToolError::AuthExpired => Err(ToolError::AuthExpired),
                other => {
                    // Not cached, so the next call tries again.
                    warn!(error = %other, "Could not read calendar timezone, using UTC");
                    Ok(Tz::UTC)
                }
            },
        }
    }

    fn calendar_id<'a>(&'a self, requested: &'a Option<String>) -> &'a str {
        requested
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&self.settings.calendar_id)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.settings.now)()
    }

    pub async fn create_calendar_event(&self, args: CreateEventArgs) -> Result<EventOutcome> {
        let calendar_id = self.calendar_id(&args.calendar_id);
        let duration = positive_minutes(
            args.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
            "duration_minutes",
        )?;
        let tz = self.timezone().await?;
        let start = parse_instant(&args.start_time, tz)?;
        if start.with_timezone(&Utc) < self.now() {
            return Err(ToolError::EventInPast(args.start_time));
        }

        let request = EventRequest {
            title: args.title,
            start,
            end: end_after(start, duration)?,
            description: args.description.filter(|s| !s.is_empty()),
            location: args.location.filter(|s| !s.is_empty()),
            time_zone: Some(tz.name().to_string()),
        };
        let event = self.client.insert_event(calendar_id, &request).await?;
        info!(event_id = %event.id, calendar_id, "Created event");
        Ok(EventOutcome {
            message: format!("Created event: {}", event.summary_line()),
            event,
        })
    }

    pub async fn update_calendar_event(&self, args: UpdateEventArgs) -> Result<EventOutcome> {
        let calendar_id = self.calendar_id(&args.calendar_id);
        let event_id = args.event_id.as_str();
        let duration = args
            .duration_minutes
            .map(|m| positive_minutes(m, "duration_minutes"))
            .transpose()?;
        let tz = self.timezone().await?;
        let new_start = args
            .start_time
            .as_deref()
            .map(|s| parse_instant(s, tz))
            .transpose()?;

        let existing = self
            .client
            .get_event(calendar_id, event_id)
            .await
            .map_err(|e| ToolError::from_client(e, Some(event_id)))?;

        let mut update = EventUpdate {
            title: args.title,
            description: args.description,
            location: args.location,
            ..Default::default()
        };
        match (new_start, duration) {
            (Some(start), Some(duration)) => {
                update.start = Some(start);
                update.end = Some(end_after(start, duration)?);
            }
            (Some(start), None) => {
                update.start = Some(start);
                // Keep the event's length.
                if let Some(interval) = existing.interval(tz) {
                    update.end = Some(end_after(start, interval.duration())?);
                }
            }
            (None, Some(duration)) => {
                let Some(old_start) = existing.start.resolve(tz) else {
                    return Err(ToolError::Unexpected(format!(
                        "event {event_id} has no usable start time"
                    )));
                };
                update.end = Some(end_after(old_start, duration)?);
            }
            (None, None) => {}
        }
        if update.start.is_some() || update.end.is_some() {
            update.time_zone = Some(tz.name().to_string());
        }

        if update.is_empty() {
            return Ok(EventOutcome {
                message: format!("No changes provided. Event: {}", existing.summary_line()),
                event: existing,
            });
        }

        let event = self
            .client
            .patch_event(calendar_id, event_id, &update)
            .await
            .map_err(|e| ToolError::from_client(e, Some(event_id)))?;
        info!(event_id, calendar_id, "Updated event");
        Ok(EventOutcome {
            message: format!("Updated event: {}", event.summary_line()),
            event,
        })
    }

    pub async fn get_free_slots(&self, args: FreeSlotsArgs) -> Result<FreeSlotReport> {
        let calendar_id = self.calendar_id(&args.calendar_id);
        let min_minutes = args.min_duration_minutes.unwrap_or(DEFAULT_MIN_SLOT_MINUTES);
        let min_duration = bounded_minutes(min_minutes, 0, "min_duration_minutes")?;
        let tz = self.timezone().await?;
        let policy = self.policy_for(tz, args.working_hours_start, args.working_hours_end)?;

        let range_start = parse_instant(&args.start_date, tz)?;
        let range_end = parse_range_end(&args.end_date, tz)?;
        if range_start >= range_end {
            return Err(ToolError::InvalidRange(format!(
                "start {} must be before end {}",
                range_start.to_rfc3339(),
                range_end.to_rfc3339()
            )));
        }

        let busy = self
            .client
            .busy_intervals(calendar_id, range_start, range_end)
            .await?;
        debug!(calendar_id, busy = busy.len(), "Fetched busy intervals");

        let slots = compute_free_slots_with_min_duration(
            range_start,
            range_end,
            &busy,
            &policy,
            min_duration,
        )?;

        let message = if slots.is_empty() {
            "No free slots found in the given range.".to_string()
        } else {
            format!(
                "Free slots ({min_minutes}min min, {}-{} {}):",
                policy.daily_start.format("%H:%M"),
                policy.daily_end.format("%H:%M"),
                tz.name()
            )
        };
        Ok(FreeSlotReport {
            message,
            timezone: tz.name().to_string(),
            min_duration_minutes: min_minutes,
            working_hours_start: policy.daily_start,
            working_hours_end: policy.daily_end,
            slots,
        })
    }

    /// Events whose `[start, end)` contains the given instant.
    pub async fn get_events_at_time(
        &self,
        datetime: &str,
        calendar_id: Option<String>,
    ) -> Result<EventListing> {
        let calendar_id = self.calendar_id(&calendar_id);
        let tz = self.timezone().await?;
        let at = parse_instant(datetime, tz)?;

        let day = Duration::days(1);
        let (Some(time_min), Some(time_max)) =
            (at.checked_sub_signed(day), at.checked_add_signed(day))
        else {
            return Err(ToolError::InvalidInput(format!(
                "datetime out of range: {datetime}"
            )));
        };
        let query = EventQuery {
            time_min,
            time_max: Some(time_max),
            max_results: None,
        };
        let located: Vec<LocatedEvent> = self
            .client
            .list_events(calendar_id, &query)
            .await?
            .into_iter()
            .filter_map(|event| LocatedEvent::new(event, tz))
            .collect();

        let events: Vec<CalendarEvent> = intervals_at(at, &located)
            .into_iter()
            .map(|located| located.event.clone())
            .collect();
        let message = if events.is_empty() {
            format!("No events at {datetime}.")
        } else {
            format!("Events at {datetime}:")
        };
        Ok(EventListing::new(message, events))
    }

    pub async fn list_upcoming_events(
        &self,
        max_results: Option<u32>,
        calendar_id: Option<String>,
    ) -> Result<EventListing> {
        let calendar_id = self.calendar_id(&calendar_id);
        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
            return Err(ToolError::InvalidInput(format!(
                "max_results must be between 1 and {MAX_RESULTS_LIMIT}, got {max_results}"
            )));
        }
        let tz = self.timezone().await?;
        let query = EventQuery {
            time_min: self.now().with_timezone(&tz).fixed_offset(),
            time_max: None,
            max_results: Some(max_results),
        };
        let events = self.client.list_events(calendar_id, &query).await?;
        let message = if events.is_empty() {
            "No upcoming events.".to_string()
        } else {
            format!("Next {} upcoming events:", events.len())
        };
        Ok(EventListing::new(message, events))
    }

    fn policy_for(
        &self,
        tz: Tz,
        start_hour: Option<u32>,
        end_hour: Option<u32>,
    ) -> Result<WorkingHoursPolicy> {
        let base = self.settings.working_hours.clone().with_timezone(tz);
        if start_hour.is_none() && end_hour.is_none() {
            return Ok(base);
        }
        let start = match start_hour {
            Some(h) => hour_of_day(h, "working_hours_start")?,
            None => base.daily_start,
        };
        let end = match end_hour {
            Some(h) => hour_of_day(h, "working_hours_end")?,
            None => base.daily_end,
        };
        Ok(base.with_hours(start, end)?)
    }
}

fn positive_minutes(minutes: i64, field: &str) -> Result<Duration> {
    bounded_minutes(minutes, 1, field)
}

/// `minutes` as a duration, if it lies in `[min, MAX_DURATION_MINUTES]`.
fn bounded_minutes(minutes: i64, min: i64, field: &str) -> Result<Duration> {
    if !(min..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(ToolError::InvalidInput(format!(
            "{field} must be between {min} and {MAX_DURATION_MINUTES} minutes, got {minutes}"
        )));
    }
    Duration::try_minutes(minutes)
        .ok_or_else(|| ToolError::InvalidInput(format!("{field} is out of range: {minutes}")))
}

fn end_after(start: DateTime<FixedOffset>, length: Duration) -> Result<DateTime<FixedOffset>> {
    start.checked_add_signed(length).ok_or_else(|| {
        ToolError::InvalidInput(format!(
            "event starting {} cannot last {} minutes",
            start.to_rfc3339(),
            length.num_minutes()
        ))
    })
}

fn hour_of_day(hour: u32, field: &str) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(|| {
        ToolError::InvalidInput(format!("{field} must be an hour between 0 and 23, got {hour}"))
    })
}

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

enum ParsedTime {
    Instant(DateTime<FixedOffset>),
    Local(NaiveDateTime),
    Date(NaiveDate),
}

fn parse_time(input: &str) -> Result<ParsedTime> {
    let s = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(ParsedTime::Instant(dt));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ParsedTime::Local(naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(ParsedTime::Date(date));
    }
    Err(ToolError::InvalidInput(format!(
        "'{input}' is not an ISO 8601 date or datetime"
    )))
}

fn localize_in(tz: Tz, naive: NaiveDateTime, input: &str) -> Result<DateTime<FixedOffset>> {
    localize(&tz, naive, DstPolicy::ShiftForward)
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| {
            ToolError::InvalidInput(format!("'{input}' does not exist in timezone {}", tz.name()))
        })
}

/// Parse an ISO 8601 datetime or date. Values without an offset are read in
/// `tz`; a bare date means its local midnight.
pub fn parse_instant(input: &str, tz: Tz) -> Result<DateTime<FixedOffset>> {
    match parse_time(input)? {
        ParsedTime::Instant(dt) => Ok(dt),
        ParsedTime::Local(naive) => localize_in(tz, naive, input),
        ParsedTime::Date(date) => localize_in(tz, date.and_time(NaiveTime::MIN), input),
    }
}

/// Like [`parse_instant`], except a bare date includes that whole day.
pub fn parse_range_end(input: &str, tz: Tz) -> Result<DateTime<FixedOffset>> {
    match parse_time(input)? {
        ParsedTime::Date(date) => {
            let next = date.succ_opt().ok_or_else(|| {
                ToolError::InvalidInput(format!("'{input}' is out of range"))
            })?;
            localize_in(tz, next.and_time(NaiveTime::MIN), input)
        }
        _ => parse_instant(input, tz),
    }
}
