use chrono::Local;
use tidy_core::events::SyncNotice;
use tidy_core::models::{FireEvent, FireKind};
use tokio::sync::broadcast::error::RecvError;

use crate::error::CliError;
use crate::host::Host;

/// Print fired alarms and sync notices until interrupted.
pub async fn run_foreground(host: Host) -> Result<(), CliError> {
    let Host {
        engine,
        mut deliveries,
    } = host;
    let mut events = engine.subscribe();
    let mut notices = engine.subscribe_sync();

    println!(
        "Watching {} alarms and {} geofences. Press Ctrl-C to stop.",
        engine.alarms().list().len(),
        engine.geofences().list().len()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some((id, scheduled_at)) = deliveries.recv() => {
                engine.alarms().on_platform_fired(id, scheduled_at).await;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_fire_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} fire events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            notice = notices.recv() => match notice {
                Ok(notice) => println!("{}", format_sync_notice(&notice)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} sync notices", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.dispose().await;
    Ok(())
}

pub fn format_fire_event(event: &FireEvent) -> String {
    let at = event.fired_at.with_timezone(&Local).format("%H:%M:%S");
    let label = match (event.kind, event.entering) {
        (FireKind::Alarm, _) => "alarm",
        (FireKind::Geofence, Some(false)) => "exit",
        (FireKind::Geofence, _) => "enter",
    };
    if event.body.is_empty() {
        format!("[{at}] {label:<5}  {}", event.title)
    } else {
        format!("[{at}] {label:<5}  {}: {}", event.title, event.body)
    }
}

pub fn format_sync_notice(notice: &SyncNotice) -> String {
    match notice {
        SyncNotice::Drained { synced, remaining } => {
            format!("sync: {synced} changes sent, {remaining} remaining")
        }
        SyncNotice::Failed {
            change_id,
            description,
            reason,
        } => format!(
            "sync: {} ({change_id}) failed: {reason}",
            description.as_deref().unwrap_or("change")
        ),
    }
}
