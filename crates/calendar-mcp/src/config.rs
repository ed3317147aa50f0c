//! Runtime configuration for the calendar tool server.
//!
//! Priority: `--config` file > `calendar-mcp.toml` in the working directory >
//! `<config dir>/calendar-mcp/config.toml` > defaults, then environment
//! overrides (a `.env` file is loaded first if present).

use std::path::{Path, PathBuf};

use availability_engine::{DstPolicy, WorkingHoursPolicy};
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const ENV_CREDENTIALS_FILE: &str = "CALENDAR_MCP_CREDENTIALS_FILE";
pub const ENV_TOKEN_FILE: &str = "CALENDAR_MCP_TOKEN_FILE";
pub const ENV_CALENDAR_ID: &str = "CALENDAR_MCP_CALENDAR_ID";
pub const ENV_TIMEZONE: &str = "CALENDAR_MCP_TIMEZONE";

pub const GOOGLE_CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub calendar: CalendarConfig,
    pub working_hours: WorkingHoursConfig,
}

/// OAuth client secret, token storage and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `client_secret.json` downloaded from the Google Cloud console.
    pub credentials_file: PathBuf,
    /// Where the authorized-user token is persisted.
    pub token_file: PathBuf,
    pub scopes: Vec<String>,
    pub revoke_url: String,
    /// How long `auth login` waits for the browser redirect.
    pub login_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let dir = default_config_dir();
        Self {
            credentials_file: dir.join("client_secret.json"),
            token_file: dir.join("token.json"),
            scopes: vec![GOOGLE_CALENDAR_SCOPE.to_string()],
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
            login_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub calendar_id: String,
    /// IANA timezone for naive timestamps and working hours. When unset the
    /// calendar's own timezone setting is used, falling back to UTC.
    pub timezone: Option<String>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            timezone: None,
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstSetting {
    Skip,
    #[default]
    ShiftForward,
}

impl From<DstSetting> for DstPolicy {
    fn from(setting: DstSetting) -> Self {
        match setting {
            DstSetting::Skip => DstPolicy::Skip,
            DstSetting::ShiftForward => DstPolicy::ShiftForward,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingHoursConfig {
    /// `HH:MM` local time.
    pub start: String,
    /// `HH:MM` local time.
    pub end: String,
    /// Weekday names, e.g. `["mon", "tue"]`.
    pub days: Vec<String>,
    pub dst: DstSetting,
}

impl Default for WorkingHoursConfig {
    fn default() -> Self {
        Self {
            start: "09:00".to_string(),
            end: "17:00".to_string(),
            days: ["mon", "tue", "wed", "thu", "fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            dst: DstSetting::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `explicit` or the default locations, then apply environment
    /// overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // No error if .env is absent.
        let _ = dotenvy::dotenv();

        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_default_locations() -> Result<Self> {
        let candidates = [
            PathBuf::from("calendar-mcp.toml"),
            default_config_dir().join("config.toml"),
        ];
        for path in &candidates {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }
        tracing::debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Apply `CALENDAR_MCP_*` overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_CREDENTIALS_FILE) {
            self.auth.credentials_file = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_TOKEN_FILE) {
            self.auth.token_file = PathBuf::from(path);
        }
        if let Some(id) = get(ENV_CALENDAR_ID) {
            self.calendar.calendar_id = id;
        }
        if let Some(tz) = get(ENV_TIMEZONE) {
            self.calendar.timezone = Some(tz);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.calendar.calendar_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "calendar.calendar_id must not be empty".to_string(),
            ));
        }
        if self.auth.scopes.is_empty() {
            return Err(ConfigError::Invalid("auth.scopes must not be empty".to_string()));
        }
        if self.auth.login_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth.login_timeout_secs must be positive".to_string(),
            ));
        }
        url::Url::parse(&self.calendar.api_base_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "calendar.api_base_url '{}': {e}",
                self.calendar.api_base_url
            ))
        })?;
        self.timezone()?;
        self.working_hours_policy()?;
        Ok(())
    }

    /// The configured timezone, if any.
    pub fn timezone(&self) -> Result<Option<Tz>> {
        self.calendar
            .timezone
            .as_deref()
            .map(parse_timezone)
            .transpose()
    }

    /// Working hours from config. The timezone is UTC until the caller
    /// resolves the effective one with [`WorkingHoursPolicy::with_timezone`].
    pub fn working_hours_policy(&self) -> Result<WorkingHoursPolicy> {
        let wh = &self.working_hours;
        let start = parse_time_of_day(&wh.start)?;
        let end = parse_time_of_day(&wh.end)?;
        let days = wh
            .days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| ConfigError::Invalid(format!("unknown weekday '{d}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        let policy = WorkingHoursPolicy::new(start, end, days, Tz::UTC)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(policy.with_dst_policy(wh.dst.into()))
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{name}'")))
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|_| ConfigError::Invalid(format!("invalid time of day '{s}', expected HH:MM")))
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("calendar-mcp"))
        .unwrap_or_else(|| PathBuf::from("."))
}
