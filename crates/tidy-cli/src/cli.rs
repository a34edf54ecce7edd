use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tidy")]
#[command(about = "Schedule alarms, watch geofences and replay offline changes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the engine config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage time-based alarms
    Alarm {
        #[command(subcommand)]
        command: AlarmCommands,
    },
    /// Manage location-based alarms
    Geofence {
        #[command(subcommand)]
        command: GeofenceCommands,
    },
    /// Inspect and replay the offline change queue
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Configure the engine
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Run the engine in the foreground and print fired alarms
    Run {
        /// JSON-lines file of positions to replay as the location stream
        #[arg(long, value_name = "PATH")]
        positions: Option<PathBuf>,
        /// Keep the sync queue offline
        #[arg(long)]
        offline: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum AlarmCommands {
    /// Schedule an alarm (replaces any alarm with the same id)
    Add {
        /// Caller-assigned alarm id
        id: i64,
        /// Alarm title
        title: String,
        /// Trigger time, RFC 3339 or `YYYY-MM-DD HH:MM`
        #[arg(long, value_name = "TIME")]
        at: String,
        /// Notification body
        #[arg(long, default_value = "")]
        body: String,
        /// Recurrence: none, minutely, hourly, daily, weekly, monthly, yearly
        #[arg(long, default_value = "none")]
        repeat: String,
    },
    /// List alarms
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel an alarm
    Cancel { id: i64 },
    /// Push an alarm back by some minutes
    Snooze {
        id: i64,
        #[arg(short, long, default_value = "10")]
        minutes: u32,
    },
    /// Re-enable a disabled alarm
    Enable { id: i64 },
    /// Disable an alarm without deleting it
    Disable { id: i64 },
    /// Schedule lead-time reminders before an event
    Remind {
        /// Backend id of the event
        event_id: i64,
        /// Event title
        title: String,
        /// Event start, RFC 3339 or `YYYY-MM-DD HH:MM`
        #[arg(long, value_name = "TIME")]
        at: String,
        /// Extra line shown under the reminder
        #[arg(long, default_value = "")]
        details: String,
        /// Minutes before the start, repeatable (defaults to 60, 15 and 5)
        #[arg(long = "before", value_name = "MINUTES")]
        before: Vec<u32>,
    },
    /// Cancel every reminder of an event
    Unremind { event_id: i64 },
    /// List alarms currently held by a notification backend
    Armed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum GeofenceCommands {
    /// Create a geofence
    Add {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in meters
        #[arg(long, default_value = "100")]
        radius: f64,
        /// enter, exit or both
        #[arg(long, default_value = "enter")]
        trigger: String,
        #[arg(long)]
        name: Option<String>,
        /// Notification body (defaults to an enter/exit message)
        #[arg(long)]
        message: Option<String>,
        /// Maximum number of fires, 0 for unlimited
        #[arg(long, default_value = "0")]
        limit: u32,
    },
    /// List geofences
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a geofence
    Delete { id: String },
    /// Re-enable a geofence
    Enable { id: String },
    /// Disable a geofence
    Disable { id: String },
    /// Show geofence statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export geofences as JSON
    Export {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Import geofences from a JSON export
    Import { path: PathBuf },
    /// Evaluate one position against the active geofences
    Check {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued changes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a change for the backend
    Enqueue {
        /// create-element, update-element, delete-element, update-profile or create-message
        kind: String,
        /// JSON payload
        #[arg(long, value_name = "JSON")]
        payload: String,
        /// Owner of the change (defaults to the configured user id)
        #[arg(long, value_name = "ID")]
        user: Option<String>,
    },
    /// Attempt every due change now
    Flush,
    /// Retry changes that failed permanently
    Retry,
    /// Remove failed changes from the queue
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the config file
    Init {
        /// Backend REST base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Bearer token for the backend
        #[arg(long, value_name = "TOKEN")]
        api_token: Option<String>,
        /// Default owner of queued changes
        #[arg(long, value_name = "ID")]
        user_id: Option<String>,
        /// Polling sweep interval in seconds
        #[arg(long, value_name = "SECS")]
        poll_interval: Option<u64>,
    },
    /// Print the effective config
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
