//! `calendar-mcp` CLI — serve the calendar tools over MCP and manage the
//! Google OAuth token.
//!
//! ## Usage
//!
//! ```sh
//! # One-time: authorize access (opens a consent URL)
//! calendar-mcp auth login
//!
//! # Run as an MCP server on stdio (what the assistant launches)
//! calendar-mcp serve
//!
//! # Check or remove the stored token
//! calendar-mcp auth status
//! calendar-mcp auth logout
//!
//! # Free slots from the command line
//! calendar-mcp free-slots --start 2026-02-25 --end 2026-02-27 --min-duration 45
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use calendar_mcp::tools::FreeSlotsArgs;
use calendar_mcp::{
    auth, server, CalendarTools, Config, CredentialStore, GoogleCalendarClient, ToolSettings,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "calendar-mcp",
    version,
    about = "Google Calendar tools for AI assistants over MCP"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./calendar-mcp.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON (always on stderr)
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdin/stdout
    Serve,
    /// Manage the stored OAuth token
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Print free slots as JSON
    FreeSlots {
        /// ISO 8601 date or datetime where the search starts
        #[arg(long)]
        start: String,
        /// ISO 8601 date or datetime where the search ends (a date includes that day)
        #[arg(long)]
        end: String,
        /// Shortest slot in minutes
        #[arg(long, default_value_t = 30)]
        min_duration: i64,
        /// Calendar ID (default: from config)
        #[arg(long)]
        calendar_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Authorize access through the browser and store the token
    Login,
    /// Revoke and delete the stored token
    Logout,
    /// Show whether a usable token is stored
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve => {
            let tools = build_tools(&config).await?;
            server::run_stdio(tools).await?;
        }
        Commands::Auth { action } => run_auth(&config, action).await?,
        Commands::FreeSlots {
            start,
            end,
            min_duration,
            calendar_id,
        } => {
            let tools = build_tools(&config).await?;
            let report = tools
                .get_free_slots(FreeSlotsArgs {
                    start_date: start,
                    end_date: end,
                    min_duration_minutes: Some(min_duration),
                    calendar_id,
                    ..Default::default()
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Logs go to stderr; stdout carries MCP frames.
fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn build_tools(config: &Config) -> Result<Arc<CalendarTools>> {
    let store = CredentialStore::open(&config.auth)
        .await
        .context("opening token store")?;
    let client = GoogleCalendarClient::new(&config.calendar, Arc::new(store))
        .context("building Calendar API client")?;
    let settings = ToolSettings {
        calendar_id: config.calendar.calendar_id.clone(),
        timezone: config.timezone()?,
        working_hours: config.working_hours_policy()?,
        now: Utc::now,
    };
    Ok(Arc::new(CalendarTools::new(Arc::new(client), settings)))
}

async fn run_auth(config: &Config, action: AuthAction) -> Result<()> {
    let store = CredentialStore::open(&config.auth)
        .await
        .with_context(|| format!("reading {}", config.auth.token_file.display()))?;

    match action {
        AuthAction::Login => {
            let creds = auth::login(&config.auth, &store, |url: &str| {
                eprintln!("Open this URL in your browser to authorize calendar access:\n\n  {url}\n");
            })
            .await
            .context("OAuth login failed")?;
            println!(
                "Authenticated. Token stored at {} (scopes: {}).",
                store.token_path().display(),
                creds.scopes.join(" ")
            );
        }
        AuthAction::Logout => {
            if store.logout().await? {
                println!("Logged out. Removed {}.", store.token_path().display());
            } else {
                println!("No stored token at {}.", store.token_path().display());
            }
        }
        AuthAction::Status => match store.current().await {
            None => println!(
                "Not authenticated (no token at {}). Run `calendar-mcp auth login`.",
                store.token_path().display()
            ),
            Some(creds) if creds.is_valid_at(Utc::now()) => match creds.expiry {
                Some(expiry) => println!("Authenticated. Access token valid until {expiry}."),
                None => println!("Authenticated."),
            },
            Some(creds) if creds.refresh_token.is_some() => {
                println!("Authenticated. Access token expired; it will be refreshed on next use.")
            }
            Some(_) => println!(
                "Authentication expired and no refresh token is stored. Run `calendar-mcp auth login`."
            ),
        },
    }
    Ok(())
}
