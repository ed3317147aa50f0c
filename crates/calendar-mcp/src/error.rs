//! Error types for the calendar tool server.
//!
//! Each layer has its own enum: credentials ([`AuthError`]), the Calendar REST
//! client ([`ClientError`]), configuration ([`ConfigError`]) and the tool
//! dispatcher ([`ToolError`]). Only [`ToolError`] is shown to the assistant, so
//! its `Display` strings are written as user-actionable messages.

use std::path::PathBuf;

use availability_engine::EngineError;
use thiserror::Error;

/// Failures obtaining or refreshing OAuth credentials.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No `token.json` has been written yet.
    #[error("not authenticated: no stored token at {}", path.display())]
    NotAuthenticated { path: PathBuf },

    /// The refresh token was rejected or is missing.
    #[error("authentication expired: {0}")]
    Expired(String),

    #[error("client secret file not found at {}", path.display())]
    MissingClientSecret { path: PathBuf },

    #[error("malformed credential file {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("OAuth flow failed: {0}")]
    Flow(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("OAuth request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures talking to the Calendar API.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Any non-2xx response.
    #[error("Calendar API returned {status}: {message}")]
    Remote { status: u16, message: String },

    /// The request never produced a response (DNS, connect, timeout).
    #[error("could not reach Calendar API: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected Calendar API payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err)
        }
    }
}

/// Failures loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced to the calling assistant.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Error: Authentication expired. Please re-run `calendar-mcp auth login`.")]
    AuthExpired,

    #[error("Error: Event ID '{0}' not found.")]
    EventNotFound(String),

    #[error("Error: Google Calendar API quota exceeded. Try again later.")]
    QuotaExceeded,

    #[error("Error: Cannot create event in the past. Start time {0} is before now.")]
    EventInPast(String),

    #[error("Error: Could not reach Google Calendar API. Check network connection.")]
    NetworkFailure,

    #[error("Error: Invalid input: {0}")]
    InvalidInput(String),

    #[error("Error: Invalid range: {0}")]
    InvalidRange(String),

    #[error("Error: Invalid working hours: {0}")]
    InvalidPolicy(String),

    #[error("Error: Unexpected failure: {0}")]
    Unexpected(String),
}

impl ToolError {
    /// Map a client failure, treating a 404 as "event not found" for `event_id`.
    pub fn from_client(err: ClientError, event_id: Option<&str>) -> Self {
        match (err, event_id) {
            (ClientError::Auth(AuthError::Http(_)), _) => ToolError::NetworkFailure,
            (ClientError::Auth(_), _) => ToolError::AuthExpired,
            (ClientError::Remote { status: 404, .. }, Some(id)) => {
                ToolError::EventNotFound(id.to_string())
            }
            (ClientError::Remote { status, message }, _)
                if (status == 403 || status == 429) && is_quota_message(&message) =>
            {
                ToolError::QuotaExceeded
            }
            (ClientError::Remote { status, .. }, _) if status >= 500 => ToolError::NetworkFailure,
            (ClientError::Transport(_), _) => ToolError::NetworkFailure,
            (other, _) => ToolError::Unexpected(other.to_string()),
        }
    }
}

impl From<ClientError> for ToolError {
    fn from(err: ClientError) -> Self {
        ToolError::from_client(err, None)
    }
}

impl From<EngineError> for ToolError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidRange { start, end } => {
                ToolError::InvalidRange(format!("start {start} must be before end {end}"))
            }
            EngineError::InvalidPolicy(msg) => ToolError::InvalidPolicy(msg),
            other @ EngineError::InvalidInterval { .. } => ToolError::Unexpected(other.to_string()),
        }
    }
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota") || lower.contains("rate limit") || lower.contains("ratelimit")
}
