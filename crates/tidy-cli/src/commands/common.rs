use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tidy_core::config::EngineConfig;
use tidy_core::models::{Alarm, Geofence, GeofenceId, SyncChange};

use crate::error::CliError;

pub const ENV_DB_PATH: &str = "TIDY_DB_PATH";
pub const ENV_CONFIG_PATH: &str = "TIDY_CONFIG_PATH";

#[derive(Debug, Serialize)]
pub struct AlarmListItem {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub trigger_at: String,
    pub relative_time: String,
    pub recurrence: String,
    pub state: String,
    pub active: bool,
    pub armed_via: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidy")
        .join("tidy.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidy")
        .join("config.json")
}

/// File config with environment overrides applied and validated.
pub fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    let config = EngineConfig::load_from_path(path)?
        .with_env_overrides()?
        .normalized()?;
    tracing::debug!("Loaded config from {}: {:?}", path.display(), config);
    Ok(config)
}

/// Accepts a full geofence id or a unique prefix of one.
pub fn resolve_geofence_id(query: &str, geofences: &[Geofence]) -> Result<GeofenceId, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::GeofenceNotFound(String::new()));
    }
    if let Ok(id) = query.parse::<GeofenceId>() {
        return Ok(id);
    }

    let matching = geofences
        .iter()
        .filter(|geofence| geofence.id.to_string().starts_with(query))
        .collect::<Vec<_>>();
    match matching.as_slice() {
        [geofence] => Ok(geofence.id),
        [] => Err(CliError::GeofenceNotFound(query.to_string())),
        _ => Err(CliError::GeofenceNotFound(format!(
            "{query} is ambiguous ({} matches)",
            matching.len()
        ))),
    }
}

pub fn alarm_to_list_item(alarm: &Alarm, now: DateTime<Utc>) -> AlarmListItem {
    AlarmListItem {
        id: alarm.id.0,
        title: alarm.title.clone(),
        body: alarm.body.clone(),
        trigger_at: alarm.trigger_at.to_rfc3339(),
        relative_time: format_relative_time(alarm.trigger_at, now),
        recurrence: alarm.recurrence.to_string(),
        state: alarm.state.to_string(),
        active: alarm.active,
        armed_via: alarm.armed_via.map(|backend| backend.to_string()),
    }
}

pub fn format_alarm_lines(alarms: &[Alarm], now: DateTime<Utc>) -> Vec<String> {
    alarms
        .iter()
        .map(|alarm| {
            let when = alarm
                .trigger_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M");
            let relative_time = format_relative_time(alarm.trigger_at, now);
            let state = if alarm.active {
                alarm.state.to_string()
            } else {
                "disabled".to_string()
            };
            let title = truncate(&alarm.title, 40);
            format!(
                "{:<6}  {when}  {relative_time:<10}  {:<8}  {state:<11}  {title}",
                alarm.id.0,
                alarm.recurrence.to_string()
            )
        })
        .collect()
}

pub fn format_geofence_lines(geofences: &[Geofence]) -> Vec<String> {
    geofences
        .iter()
        .map(|geofence| {
            let id = geofence.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let limit = if geofence.repeat_limit == 0 {
                "-".to_string()
            } else {
                geofence.repeat_limit.to_string()
            };
            let status = if geofence.active { "" } else { "  (disabled)" };
            format!(
                "{short_id:<13}  {:<24}  ({:.5}, {:.5})  {:>6.0} m  {:<5}  fired {}/{limit}{status}",
                truncate(&geofence.name, 24),
                geofence.center.latitude,
                geofence.center.longitude,
                geofence.radius_meters,
                geofence.trigger_type.to_string(),
                geofence.fire_count
            )
        })
        .collect()
}

pub fn format_change_lines(changes: &[SyncChange], now: DateTime<Utc>) -> Vec<String> {
    changes
        .iter()
        .map(|change| {
            let id = change.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let status = if change.synced {
                "synced".to_string()
            } else if let Some(error) = &change.sync_error {
                format!("failed: {}", truncate(error, 40))
            } else if change.attempts > 0 {
                format!("retrying ({} attempts)", change.attempts)
            } else {
                "pending".to_string()
            };
            let description = change
                .description
                .clone()
                .unwrap_or_else(|| change.kind.to_string());
            format!(
                "{short_id:<13}  {:<15}  {:<10}  {description}  [{status}]",
                change.kind.to_string(),
                format_relative_time(change.created_at, now)
            )
        })
        .collect()
}

/// First line of `value`, whitespace collapsed and cut to `max_chars`.
pub fn truncate(value: &str, max_chars: usize) -> String {
    let first_line = value.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

/// Human offset between `target` and `now`, in either direction.
pub fn format_relative_time(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (target - now).num_seconds();
    let future = diff > 0;
    let magnitude = diff.unsigned_abs();
    let minute = 60;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if magnitude < minute {
        return "now".to_string();
    }

    let amount = if magnitude < hour {
        format!("{}m", magnitude / minute)
    } else if magnitude < day {
        format!("{}h", magnitude / hour)
    } else if magnitude < week {
        format!("{}d", magnitude / day)
    } else {
        format!("{}w", magnitude / week)
    };

    if future {
        format!("in {amount}")
    } else {
        format!("{amount} ago")
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
