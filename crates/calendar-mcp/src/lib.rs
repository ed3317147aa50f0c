//! # calendar-mcp
//!
//! Google Calendar tools for AI assistants, served over the Model Context
//! Protocol.
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration with environment overrides
//! - [`auth`] — OAuth token storage, refresh, login and logout
//! - [`client`] — `CalendarClient` trait and the Calendar v3 REST client
//! - [`model`] — Event types shared by the client and the tools
//! - [`tools`] — The five calendar tools, independent of MCP
//! - [`server`] — rmcp server handler and stdio transport
//! - [`error`] — Error types
//!
//! Free-slot computation lives in the `availability-engine` crate.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod server;
pub mod tools;

pub use auth::{login, CredentialProvider, CredentialStore, Credentials};
pub use client::{CalendarClient, EventQuery, GoogleCalendarClient};
pub use config::Config;
pub use error::{AuthError, ClientError, ConfigError, ToolError};
pub use model::{CalendarEvent, EventRequest, EventTime, EventUpdate, LocatedEvent};
pub use server::CalendarServer;
pub use tools::{CalendarTools, ToolSettings};
