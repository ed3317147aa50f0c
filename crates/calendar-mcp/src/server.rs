//! MCP server exposing the calendar tools over stdio.

use std::future::Future;
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    schemars, tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ToolError;
use crate::tools::{CalendarTools, CreateEventArgs, FreeSlotsArgs, UpdateEventArgs};

// Parameters for create_calendar_event
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CreateEventParams {
    /// Event title
    pub title: String,
    /// ISO 8601 start, e.g. 2026-02-25T14:00:00+08:00. Without an offset the
    /// calendar's timezone is used.
    pub start_time: String,
    /// Length in minutes, at most 527040 (one leap year). Default: 60.
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Calendar ID (default: the configured calendar, usually "primary")
    #[serde(default)]
    pub calendar_id: Option<String>,
}

// Parameters for update_calendar_event
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct UpdateEventParams {
    /// ID of the event to change, as shown by the listing tools
    pub event_id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// New ISO 8601 start. The event keeps its length unless
    /// duration_minutes is also given.
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

// Parameters for get_free_slots
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FreeSlotsParams {
    /// ISO 8601 date or datetime where the search starts
    pub start_date: String,
    /// ISO 8601 date or datetime where the search ends; a date includes that day
    pub end_date: String,
    /// Shortest slot to return in minutes, 0-527040 (default: 30)
    #[serde(default)]
    pub min_duration_minutes: Option<i64>,
    /// Working day start hour, 0-23 (default: configured hours)
    #[serde(default)]
    pub working_hours_start: Option<u32>,
    /// Working day end hour, 0-23 and after the start hour (default: configured hours)
    #[serde(default)]
    pub working_hours_end: Option<u32>,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

// Parameters for get_events_at_time
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct EventsAtTimeParams {
    /// ISO 8601 datetime to look up
    pub datetime: String,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

// Parameters for list_upcoming_events
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ListEventsParams {
    /// Number of events to return, 1-2500 (default: 10)
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

/// Calendar MCP server handler.
#[derive(Clone)]
pub struct CalendarServer {
    tools: Arc<CalendarTools>,
    tool_router: ToolRouter<Self>,
}

impl CalendarServer {
    pub fn new(tools: Arc<CalendarTools>) -> Self {
        Self {
            tools,
            tool_router: Self::tool_router(),
        }
    }
}

/// Render a tool outcome: pretty JSON on success, the user-facing message on
/// failure.
fn respond<T: Serialize>(tool: &str, outcome: Result<T, ToolError>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(value) => {
            let json = serde_json::to_string_pretty(&value).map_err(|e| {
                McpError::internal_error(format!("Failed to encode {tool} result: {e}"), None)
            })?;
            Ok(CallToolResult::success(vec![Content::text(json)]))
        }
        Err(err) => {
            warn!(tool, error = %err, "Tool call failed");
            Ok(CallToolResult::error(vec![Content::text(err.to_string())]))
        }
    }
}

#[tool_router]
impl CalendarServer {
    #[tool(
        description = "Create a calendar event. Returns the created event with its ID. start_time must be ISO 8601, e.g. 2026-02-25T14:00:00+08:00; events cannot start in the past."
    )]
    async fn create_calendar_event(
        &self,
        Parameters(params): Parameters<CreateEventParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .tools
            .create_calendar_event(CreateEventArgs {
                title: params.title,
                start_time: params.start_time,
                duration_minutes: params.duration_minutes,
                description: params.description,
                location: params.location,
                calendar_id: params.calendar_id,
            })
            .await;
        respond("create_calendar_event", outcome)
    }

    #[tool(
        description = "Update an existing event. Only provided fields are changed; moving the start keeps the event's length unless duration_minutes is given."
    )]
    async fn update_calendar_event(
        &self,
        Parameters(params): Parameters<UpdateEventParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .tools
            .update_calendar_event(UpdateEventArgs {
                event_id: params.event_id,
                title: params.title,
                start_time: params.start_time,
                duration_minutes: params.duration_minutes,
                description: params.description,
                location: params.location,
                calendar_id: params.calendar_id,
            })
            .await;
        respond("update_calendar_event", outcome)
    }

    #[tool(
        description = "Return free time slots between start_date and end_date, inside working hours and at least min_duration_minutes long."
    )]
    async fn get_free_slots(
        &self,
        Parameters(params): Parameters<FreeSlotsParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .tools
            .get_free_slots(FreeSlotsArgs {
                start_date: params.start_date,
                end_date: params.end_date,
                min_duration_minutes: params.min_duration_minutes,
                working_hours_start: params.working_hours_start,
                working_hours_end: params.working_hours_end,
                calendar_id: params.calendar_id,
            })
            .await;
        respond("get_free_slots", outcome)
    }

    #[tool(
        description = "Return the events in progress at the given datetime, each with its ID. Use this to answer 'what should I be doing at 2pm?'."
    )]
    async fn get_events_at_time(
        &self,
        Parameters(params): Parameters<EventsAtTimeParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .tools
            .get_events_at_time(&params.datetime, params.calendar_id)
            .await;
        respond("get_events_at_time", outcome)
    }

    #[tool(description = "List the next N upcoming events, each with its ID.")]
    async fn list_upcoming_events(
        &self,
        Parameters(params): Parameters<ListEventsParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .tools
            .list_upcoming_events(params.max_results, params.calendar_id)
            .await;
        respond("list_upcoming_events", outcome)
    }
}

#[tool_handler]
impl ServerHandler for CalendarServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Google Calendar assistant. Use 'list_upcoming_events' or \
                 'get_events_at_time' to find events and their IDs, \
                 'get_free_slots' to find time for a meeting, and \
                 'create_calendar_event' / 'update_calendar_event' to change the calendar."
                    .to_string(),
            ),
        }
    }
}

/// Serve MCP over stdin/stdout until the client disconnects.
pub async fn run_stdio(tools: Arc<CalendarTools>) -> anyhow::Result<()> {
    info!("Starting calendar MCP server on stdio");
    let service = CalendarServer::new(tools).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
