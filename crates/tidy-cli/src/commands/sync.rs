use chrono::Utc;
use serde_json::Value;
use tidy_core::models::{ChangeKind, NewSyncChange};
use tidy_core::util::normalize_text_option;
use tidy_core::Engine;

use crate::cli::SyncCommands;
use crate::commands::common::{format_change_lines, print_json};
use crate::error::CliError;

pub async fn run_sync(command: SyncCommands, engine: &Engine) -> Result<(), CliError> {
    let queue = engine.sync();
    match command {
        SyncCommands::Status { json } => {
            let stats = queue.stats();
            if json {
                print_json(&stats)?;
            } else {
                println!("Status:   {}", queue.status().label());
                println!("Online:   {}", if stats.online { "yes" } else { "no" });
                println!("Queued:   {}", stats.total);
                println!("Pending:  {}", stats.pending);
                println!("Failed:   {}", stats.errors);
            }
        }
        SyncCommands::List { json } => {
            let changes = queue.list();
            if json {
                print_json(&changes)?;
            } else if changes.is_empty() {
                println!("Sync queue is empty.");
            } else {
                for line in format_change_lines(&changes, Utc::now()) {
                    println!("{line}");
                }
            }
        }
        SyncCommands::Enqueue {
            kind,
            payload,
            user,
        } => {
            let user_id = normalize_text_option(user)
                .or_else(|| engine.config().user_id.clone())
                .ok_or(CliError::MissingUser)?;
            let kind = kind.parse::<ChangeKind>()?;
            let payload: Value = serde_json::from_str(&payload)
                .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
            let change = queue.enqueue(build_change(kind, user_id, payload)?).await?;
            println!("{}", change.id);
        }
        SyncCommands::Flush => {
            if !queue.refresh_connectivity().await {
                println!("Backend unreachable, changes stay queued.");
                return Ok(());
            }
            let report = queue.drain().await;
            println!(
                "Attempted {}, synced {}, rescheduled {}, failed {}",
                report.attempted, report.synced, report.rescheduled, report.failed
            );
        }
        SyncCommands::Retry => {
            let retried = queue.retry_failed().await?;
            println!("Retrying {retried} failed changes");
        }
        SyncCommands::Clear => {
            let removed = queue.clear_history().await?;
            println!("Removed {removed} failed changes");
        }
    }
    Ok(())
}

/// Shape a raw CLI payload into the change the backend route expects.
pub fn build_change(
    kind: ChangeKind,
    user_id: String,
    payload: Value,
) -> Result<NewSyncChange, CliError> {
    match kind {
        ChangeKind::CreateElement => Ok(NewSyncChange::create_element(user_id, payload)),
        ChangeKind::UpdateElement => Ok(NewSyncChange::update_element(user_id, payload)),
        ChangeKind::DeleteElement => {
            let id = payload
                .as_i64()
                .or_else(|| payload.get("id").and_then(Value::as_i64))
                .ok_or_else(|| {
                    CliError::InvalidPayload("delete-element needs a numeric id".to_string())
                })?;
            Ok(NewSyncChange::delete_element(user_id, id))
        }
        ChangeKind::UpdateProfile => Ok(NewSyncChange::update_profile(user_id, payload)),
        ChangeKind::CreateMessage => {
            let chat_id = match payload.get("chatId") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => {
                    return Err(CliError::InvalidPayload(
                        "create-message needs a chatId".to_string(),
                    ))
                }
            };
            let message = payload.get("message").cloned().ok_or_else(|| {
                CliError::InvalidPayload("create-message needs a message".to_string())
            })?;
            Ok(NewSyncChange::create_message(user_id, chat_id, message))
        }
    }
}
