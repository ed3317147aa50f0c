//! Tool dispatcher tests against an in-memory calendar.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use availability_engine::TimeInterval;
use calendar_mcp::client::{CalendarClient, EventQuery};
use calendar_mcp::tools::{CreateEventArgs, FreeSlotsArgs, UpdateEventArgs, MAX_DURATION_MINUTES};
use calendar_mcp::{
    AuthError, CalendarEvent, CalendarTools, ClientError, EventRequest, EventTime, EventUpdate,
    ToolError, ToolSettings,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

type ClientResult<T> = Result<T, ClientError>;

/// In-memory calendar recording every mutation.
#[derive(Default)]
struct FakeCalendar {
    events: Mutex<Vec<CalendarEvent>>,
    busy: Vec<TimeInterval>,
    timezone: Option<String>,
    /// When set, every call fails with this error.
    failure: Option<fn() -> ClientError>,
    inserted: Mutex<Vec<EventRequest>>,
    patches: Mutex<Vec<(String, EventUpdate)>>,
    queries: Mutex<Vec<EventQuery>>,
}

impl FakeCalendar {
    fn fail(&self) -> ClientResult<()> {
        match self.failure {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CalendarClient for FakeCalendar {
    async fn busy_intervals(
        &self,
        _calendar_id: &str,
        _time_min: DateTime<FixedOffset>,
        _time_max: DateTime<FixedOffset>,
    ) -> ClientResult<Vec<TimeInterval>> {
        self.fail()?;
        Ok(self.busy.clone())
    }

    async fn list_events(
        &self,
        _calendar_id: &str,
        query: &EventQuery,
    ) -> ClientResult<Vec<CalendarEvent>> {
        self.fail()?;
        self.queries.lock().unwrap().push(query.clone());
        let mut events = self.events.lock().unwrap().clone();
        if let Some(max) = query.max_results {
            events.truncate(max as usize);
        }
        Ok(events)
    }

    async fn get_event(&self, _calendar_id: &str, event_id: &str) -> ClientResult<CalendarEvent> {
        self.fail()?;
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .ok_or(ClientError::Remote {
                status: 404,
                message: "Not Found (notFound)".to_string(),
            })
    }

    async fn insert_event(
        &self,
        _calendar_id: &str,
        request: &EventRequest,
    ) -> ClientResult<CalendarEvent> {
        self.fail()?;
        self.inserted.lock().unwrap().push(request.clone());
        Ok(CalendarEvent {
            id: "created1".to_string(),
            summary: Some(request.title.clone()),
            start: EventTime::DateTime(request.start),
            end: EventTime::DateTime(request.end),
            location: request.location.clone(),
            description: request.description.clone(),
            html_link: None,
        })
    }

    async fn patch_event(
        &self,
        _calendar_id: &str,
        event_id: &str,
        update: &EventUpdate,
    ) -> ClientResult<CalendarEvent> {
        self.fail()?;
        self.patches
            .lock()
            .unwrap()
            .push((event_id.to_string(), update.clone()));
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(ClientError::Remote {
                status: 404,
                message: "Not Found".to_string(),
            })?;
        if let Some(title) = &update.title {
            event.summary = Some(title.clone());
        }
        if let Some(start) = update.start {
            event.start = EventTime::DateTime(start);
        }
        if let Some(end) = update.end {
            event.end = EventTime::DateTime(end);
        }
        Ok(event.clone())
    }

    async fn user_timezone(&self) -> ClientResult<String> {
        self.fail()?;
        Ok(self.timezone.clone().unwrap_or_else(|| "UTC".to_string()))
    }
}

fn ts(s: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(s).unwrap()
}

/// Tuesday 2026-02-24 12:00 UTC.
fn fixed_now() -> DateTime<Utc> {
    ts("2026-02-24T12:00:00Z").with_timezone(&Utc)
}

fn timed(id: &str, start: &str, end: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        summary: Some(format!("Event {id}")),
        start: EventTime::DateTime(ts(start)),
        end: EventTime::DateTime(ts(end)),
        location: None,
        description: None,
        html_link: None,
    }
}

fn tools_with(fake: FakeCalendar, timezone: Option<Tz>) -> (Arc<FakeCalendar>, CalendarTools) {
    let fake = Arc::new(fake);
    let settings = ToolSettings {
        timezone,
        now: fixed_now,
        ..ToolSettings::default()
    };
    let tools = CalendarTools::new(fake.clone(), settings);
    (fake, tools)
}

fn utc_tools(fake: FakeCalendar) -> (Arc<FakeCalendar>, CalendarTools) {
    tools_with(fake, Some(Tz::UTC))
}

// ─────────────────────────────────────────────────────────────────────────────
// create_calendar_event
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_rejects_start_in_the_past() {
    let (fake, tools) = utc_tools(FakeCalendar::default());
    let err = tools
        .create_calendar_event(CreateEventArgs {
            title: "Retro".to_string(),
            start_time: "2026-02-20T10:00:00Z".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(&err, ToolError::EventInPast(s) if s == "2026-02-20T10:00:00Z"));
    assert!(err.to_string().contains("Cannot create event in the past"));
    assert!(fake.inserted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn create_localizes_naive_start_and_defaults_to_an_hour() {
    let (fake, tools) = tools_with(FakeCalendar::default(), Some(chrono_tz::Asia::Singapore));
    let outcome = tools
        .create_calendar_event(CreateEventArgs {
            title: "Design review".to_string(),
            start_time: "2026-02-25T14:00".to_string(),
            description: Some(String::new()),
            location: Some("Room 4".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let inserted = fake.inserted.lock().unwrap();
    assert_eq!(inserted[0].start, ts("2026-02-25T14:00:00+08:00"));
    assert_eq!(inserted[0].end, ts("2026-02-25T15:00:00+08:00"));
    assert_eq!(inserted[0].time_zone.as_deref(), Some("Asia/Singapore"));
    assert_eq!(inserted[0].description, None);
    assert!(outcome.message.starts_with("Created event: ID: created1 | Design review"));
}

#[tokio::test]
async fn create_rejects_non_positive_duration() {
    let (_, tools) = utc_tools(FakeCalendar::default());
    let err = tools
        .create_calendar_event(CreateEventArgs {
            title: "Nothing".to_string(),
            start_time: "2026-03-01T10:00:00Z".to_string(),
            duration_minutes: Some(0),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidInput(_)));
}

#[tokio::test]
async fn create_rejects_out_of_range_duration() {
    let (fake, tools) = utc_tools(FakeCalendar::default());
    for minutes in [i64::MAX, 100_000_000_000, MAX_DURATION_MINUTES + 1] {
        let err = tools
            .create_calendar_event(CreateEventArgs {
                title: "Forever".to_string(),
                start_time: "2026-02-25T10:00:00Z".to_string(),
                duration_minutes: Some(minutes),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)), "{minutes}: {err}");
    }
    assert!(fake.inserted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn create_accepts_longest_duration() {
    let (fake, tools) = utc_tools(FakeCalendar::default());
    tools
        .create_calendar_event(CreateEventArgs {
            title: "Sabbatical".to_string(),
            start_time: "2026-03-01T00:00:00Z".to_string(),
            duration_minutes: Some(MAX_DURATION_MINUTES),
            ..Default::default()
        })
        .await
        .unwrap();
    let inserted = fake.inserted.lock().unwrap();
    assert_eq!(inserted[0].end, ts("2027-03-02T00:00:00Z"));
}

#[tokio::test]
async fn create_maps_quota_errors() {
    let (_, tools) = utc_tools(FakeCalendar {
        failure: Some(|| ClientError::Remote {
            status: 403,
            message: "Rate Limit Exceeded (rateLimitExceeded)".to_string(),
        }),
        ..Default::default()
    });
    let err = tools
        .create_calendar_event(CreateEventArgs {
            title: "Sync".to_string(),
            start_time: "2026-03-01T10:00:00Z".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::QuotaExceeded));
}

// ─────────────────────────────────────────────────────────────────────────────
// update_calendar_event
// ─────────────────────────────────────────────────────────────────────────────

fn calendar_with_standup() -> FakeCalendar {
    FakeCalendar {
        events: Mutex::new(vec![timed(
            "standup",
            "2026-02-25T10:00:00Z",
            "2026-02-25T10:45:00Z",
        )]),
        ..Default::default()
    }
}

#[tokio::test]
async fn moving_start_keeps_duration() {
    let (fake, tools) = utc_tools(calendar_with_standup());
    let outcome = tools
        .update_calendar_event(UpdateEventArgs {
            event_id: "standup".to_string(),
            start_time: Some("2026-02-25T13:00:00Z".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let patches = fake.patches.lock().unwrap();
    let (id, update) = &patches[0];
    assert_eq!(id, "standup");
    assert_eq!(update.start, Some(ts("2026-02-25T13:00:00Z")));
    assert_eq!(update.end, Some(ts("2026-02-25T13:45:00Z")));
    assert!(update.title.is_none());
    assert!(outcome.message.starts_with("Updated event: ID: standup"));
}

#[tokio::test]
async fn duration_alone_moves_end() {
    let (fake, tools) = utc_tools(calendar_with_standup());
    tools
        .update_calendar_event(UpdateEventArgs {
            event_id: "standup".to_string(),
            duration_minutes: Some(90),
            ..Default::default()
        })
        .await
        .unwrap();

    let patches = fake.patches.lock().unwrap();
    assert_eq!(patches[0].1.start, None);
    assert_eq!(patches[0].1.end, Some(ts("2026-02-25T11:30:00Z")));
}

#[tokio::test]
async fn start_and_duration_together() {
    let (fake, tools) = utc_tools(calendar_with_standup());
    tools
        .update_calendar_event(UpdateEventArgs {
            event_id: "standup".to_string(),
            start_time: Some("2026-02-26T09:00:00+01:00".to_string()),
            duration_minutes: Some(15),
            ..Default::default()
        })
        .await
        .unwrap();

    let patches = fake.patches.lock().unwrap();
    assert_eq!(patches[0].1.start, Some(ts("2026-02-26T09:00:00+01:00")));
    assert_eq!(patches[0].1.end, Some(ts("2026-02-26T09:15:00+01:00")));
}

#[tokio::test]
async fn update_rejects_out_of_range_duration() {
    let (fake, tools) = utc_tools(calendar_with_standup());
    for minutes in [i64::MAX, i64::MIN, -30, 0] {
        let err = tools
            .update_calendar_event(UpdateEventArgs {
                event_id: "standup".to_string(),
                start_time: Some("2026-02-26T09:00:00Z".to_string()),
                duration_minutes: Some(minutes),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)), "{minutes}: {err}");
    }
    assert!(fake.patches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_update_reports_no_changes() {
    let (fake, tools) = utc_tools(calendar_with_standup());
    let outcome = tools
        .update_calendar_event(UpdateEventArgs {
            event_id: "standup".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(outcome.message.starts_with("No changes provided. Event: ID: standup"));
    assert!(fake.patches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn updating_unknown_event_is_not_found() {
    let (_, tools) = utc_tools(calendar_with_standup());
    let err = tools
        .update_calendar_event(UpdateEventArgs {
            event_id: "nope".to_string(),
            title: Some("x".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(&err, ToolError::EventNotFound(id) if id == "nope"));
    assert_eq!(err.to_string(), "Error: Event ID 'nope' not found.");
}

// ─────────────────────────────────────────────────────────────────────────────
// get_free_slots
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn free_slots_around_a_meeting() {
    let (_, tools) = utc_tools(FakeCalendar {
        busy: vec![TimeInterval::new(ts("2026-02-25T10:00:00Z"), ts("2026-02-25T11:00:00Z")).unwrap()],
        ..Default::default()
    });

    // Wednesday through Thursday, both whole days.
    let report = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "2026-02-25".to_string(),
            end_date: "2026-02-26".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let spans: Vec<_> = report.slots.iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(
        spans,
        vec![
            (ts("2026-02-25T09:00:00Z"), ts("2026-02-25T10:00:00Z")),
            (ts("2026-02-25T11:00:00Z"), ts("2026-02-25T17:00:00Z")),
            (ts("2026-02-26T09:00:00Z"), ts("2026-02-26T17:00:00Z")),
        ]
    );
    assert_eq!(report.timezone, "UTC");
    assert_eq!(report.min_duration_minutes, 30);
}

#[tokio::test]
async fn free_slots_hour_overrides_and_min_duration() {
    let (_, tools) = utc_tools(FakeCalendar {
        busy: vec![
            TimeInterval::new(ts("2026-02-25T09:20:00Z"), ts("2026-02-25T12:00:00Z")).unwrap(),
        ],
        ..Default::default()
    });

    let report = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "2026-02-25T00:00:00Z".to_string(),
            end_date: "2026-02-26T00:00:00Z".to_string(),
            min_duration_minutes: Some(45),
            working_hours_start: Some(9),
            working_hours_end: Some(18),
            ..Default::default()
        })
        .await
        .unwrap();

    // The 20-minute gap before the meeting is dropped.
    assert_eq!(report.slots.len(), 1);
    assert_eq!(report.slots[0].start, ts("2026-02-25T12:00:00Z"));
    assert_eq!(report.slots[0].end, ts("2026-02-25T18:00:00Z"));
    assert_eq!(report.working_hours_end, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
}

#[tokio::test]
async fn free_slots_in_calendar_timezone() {
    let (_, tools) = tools_with(
        FakeCalendar {
            timezone: Some("America/New_York".to_string()),
            ..Default::default()
        },
        None,
    );

    let report = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "2026-02-25".to_string(),
            end_date: "2026-02-25".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.timezone, "America/New_York");
    assert_eq!(report.slots.len(), 1);
    assert_eq!(report.slots[0].start, ts("2026-02-25T09:00:00-05:00"));
    assert_eq!(report.slots[0].end, ts("2026-02-25T17:00:00-05:00"));
}

#[tokio::test]
async fn free_slots_invalid_inputs() {
    let (_, tools) = utc_tools(FakeCalendar::default());

    let inverted = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "2026-02-27T00:00:00Z".to_string(),
            end_date: "2026-02-25T00:00:00Z".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(inverted, ToolError::InvalidRange(_)));

    let bad_hours = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "2026-02-25".to_string(),
            end_date: "2026-02-26".to_string(),
            working_hours_start: Some(18),
            working_hours_end: Some(9),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(bad_hours, ToolError::InvalidPolicy(_)));

    let unparseable = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "tomorrow".to_string(),
            end_date: "2026-02-26".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(unparseable, ToolError::InvalidInput(_)));
}

#[tokio::test]
async fn free_slots_rejects_out_of_range_min_duration() {
    let (_, tools) = utc_tools(FakeCalendar::default());
    for minutes in [i64::MAX, MAX_DURATION_MINUTES + 1, -1, i64::MIN] {
        let err = tools
            .get_free_slots(FreeSlotsArgs {
                start_date: "2026-02-25".to_string(),
                end_date: "2026-02-26".to_string(),
                min_duration_minutes: Some(minutes),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)), "{minutes}: {err}");
    }
}

#[tokio::test]
async fn free_slots_with_longest_minimum_finds_nothing() {
    let (_, tools) = utc_tools(FakeCalendar::default());
    let report = tools
        .get_free_slots(FreeSlotsArgs {
            start_date: "2026-02-25".to_string(),
            end_date: "2026-02-26".to_string(),
            min_duration_minutes: Some(MAX_DURATION_MINUTES),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.slots.is_empty());
    assert_eq!(report.min_duration_minutes, MAX_DURATION_MINUTES);
}

#[tokio::test]
async fn free_slots_rejects_bad_hour_overrides() {
    let (_, tools) = utc_tools(FakeCalendar::default());
    let args = |start: Option<u32>, end: Option<u32>| FreeSlotsArgs {
        start_date: "2026-02-25".to_string(),
        end_date: "2026-02-26".to_string(),
        working_hours_start: start,
        working_hours_end: end,
        ..Default::default()
    };

    let empty_day = tools.get_free_slots(args(Some(9), Some(9))).await.unwrap_err();
    assert!(matches!(empty_day, ToolError::InvalidPolicy(_)));

    // End override alone still has to come after the configured 09:00 start.
    let before_start = tools.get_free_slots(args(None, Some(8))).await.unwrap_err();
    assert!(matches!(before_start, ToolError::InvalidPolicy(_)));

    let past_midnight = tools.get_free_slots(args(Some(9), Some(24))).await.unwrap_err();
    assert!(matches!(past_midnight, ToolError::InvalidInput(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// get_events_at_time / list_upcoming_events
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_at_boundary_are_half_open() {
    let (fake, tools) = utc_tools(FakeCalendar {
        events: Mutex::new(vec![
            timed("first", "2026-02-25T09:00:00Z", "2026-02-25T10:00:00Z"),
            timed("second", "2026-02-25T10:00:00Z", "2026-02-25T11:00:00Z"),
        ]),
        ..Default::default()
    });

    let listing = tools
        .get_events_at_time("2026-02-25T10:00:00Z", None)
        .await
        .unwrap();
    let ids: Vec<&str> = listing.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["second"]);
    assert_eq!(listing.message, "Events at 2026-02-25T10:00:00Z:");
    assert!(listing.summaries[0].starts_with("ID: second |"));

    let query = &fake.queries.lock().unwrap()[0];
    assert_eq!(query.time_min, ts("2026-02-24T10:00:00Z"));
    assert_eq!(query.time_max, Some(ts("2026-02-26T10:00:00Z")));
}

#[tokio::test]
async fn all_day_event_found_in_resolved_timezone() {
    let day = NaiveDate::from_ymd_opt(2026, 2, 25).unwrap();
    let (_, tools) = tools_with(
        FakeCalendar {
            events: Mutex::new(vec![CalendarEvent {
                start: EventTime::Date(day),
                end: EventTime::Date(day.succ_opt().unwrap()),
                ..timed("offsite", "2026-02-25T00:00:00Z", "2026-02-25T01:00:00Z")
            }]),
            ..Default::default()
        },
        Some(chrono_tz::Asia::Tokyo),
    );

    // 23:30 Tokyo on the 25th is inside; 23:30 UTC on the 25th is the 26th in Tokyo.
    let inside = tools.get_events_at_time("2026-02-25T23:30", None).await.unwrap();
    assert_eq!(inside.events.len(), 1);
    let outside = tools
        .get_events_at_time("2026-02-25T23:30:00Z", None)
        .await
        .unwrap();
    assert!(outside.events.is_empty());
    assert_eq!(outside.message, "No events at 2026-02-25T23:30:00Z.");
}

#[tokio::test]
async fn list_upcoming_validates_and_starts_now() {
    let (fake, tools) = utc_tools(FakeCalendar {
        events: Mutex::new(vec![
            timed("a", "2026-02-25T09:00:00Z", "2026-02-25T10:00:00Z"),
            timed("b", "2026-02-26T09:00:00Z", "2026-02-26T10:00:00Z"),
        ]),
        ..Default::default()
    });

    for bad in [0, 2501] {
        let err = tools.list_upcoming_events(Some(bad), None).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)), "max_results={bad}");
    }

    let listing = tools.list_upcoming_events(None, None).await.unwrap();
    assert_eq!(listing.events.len(), 2);
    assert_eq!(listing.message, "Next 2 upcoming events:");

    let query = &fake.queries.lock().unwrap()[0];
    assert_eq!(query.max_results, Some(10));
    assert_eq!(query.time_min, ts("2026-02-24T12:00:00Z"));
    assert_eq!(query.time_max, None);
}

#[tokio::test]
async fn empty_calendar_listing() {
    let (_, tools) = utc_tools(FakeCalendar::default());
    let listing = tools.list_upcoming_events(Some(5), None).await.unwrap();
    assert!(listing.events.is_empty());
    assert_eq!(listing.message, "No upcoming events.");
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn auth_failure_surfaces_as_auth_expired() {
    let (_, tools) = tools_with(
        FakeCalendar {
            failure: Some(|| ClientError::Auth(AuthError::Expired("invalid_grant".to_string()))),
            ..Default::default()
        },
        None,
    );
    let err = tools.list_upcoming_events(None, None).await.unwrap_err();
    assert!(matches!(err, ToolError::AuthExpired));
    assert!(err.to_string().contains("calendar-mcp auth login"));
}

#[tokio::test]
async fn server_errors_surface_as_network_failure() {
    let (_, tools) = utc_tools(FakeCalendar {
        failure: Some(|| ClientError::Remote {
            status: 503,
            message: "Backend Error".to_string(),
        }),
        ..Default::default()
    });
    let err = tools
        .get_events_at_time("2026-02-25T10:00:00Z", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NetworkFailure));
}

#[tokio::test]
async fn unknown_calendar_timezone_falls_back_to_utc() {
    let (_, tools) = tools_with(
        FakeCalendar {
            timezone: Some("Not/AZone".to_string()),
            ..Default::default()
        },
        None,
    );
    assert_eq!(tools.timezone().await.unwrap(), Tz::UTC);
}
