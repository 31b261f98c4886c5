use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "eventdesk",
    version,
    about = "Command-line client for the eventdesk event management service",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "EVENTDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// API base URL (e.g. https://events.example.edu/api)
    #[arg(long, global = true, env = "EVENTDESK_BASE_URL")]
    pub base_url: Option<String>,

    /// Request timeout in seconds (0 disables it)
    #[arg(long, global = true, env = "EVENTDESK_TIMEOUT_SECS")]
    pub timeout: Option<u64>,

    /// Connection timeout in seconds
    #[arg(long, global = true, env = "EVENTDESK_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout: Option<u64>,

    /// User agent sent with every request
    #[arg(long, global = true, env = "EVENTDESK_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and save the session
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "EVENTDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and forget the saved session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List events
    Events {
        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: u32,

        /// Page size
        #[arg(long, default_value_t = 6)]
        size: u32,

        /// Sort field
        #[arg(long, default_value = "startTime")]
        sort_by: String,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Filter by status
        #[arg(long)]
        status: Option<String>,

        /// Free-text search
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show one event
    Event {
        /// Event id
        id: i64,
    },

    /// List the participants of an event
    Participants {
        /// Event id
        event_id: i64,
    },

    /// Follow check-ins for an event live
    Watch {
        /// Event id
        event_id: i64,
    },

    /// Check in to an event with its check-in token
    CheckIn {
        /// Token from the event's QR code
        token: String,
    },

    /// Join an event with its invitation token
    Join {
        /// Invitation token
        token: String,
    },

    /// Show the resolved configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Pretty,
    /// Pretty-printed JSON
    Json,
}
