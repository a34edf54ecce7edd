use chrono::Utc;
use tidy_core::models::{
    AlarmId, AlarmRequest, EventReminder, Recurrence, DEFAULT_REMINDER_MINUTES,
};
use tidy_core::Engine;

use crate::cli::AlarmCommands;
use crate::commands::common::{alarm_to_list_item, format_alarm_lines, print_json};
use crate::error::CliError;

pub async fn run_alarm(command: AlarmCommands, engine: &Engine) -> Result<(), CliError> {
    let alarms = engine.alarms();
    match command {
        AlarmCommands::Add {
            id,
            title,
            at,
            body,
            repeat,
        } => {
            let request = AlarmRequest {
                id: AlarmId(id),
                title,
                body,
                trigger_at: at,
                recurrence: repeat.parse::<Recurrence>()?,
            };
            let outcome = alarms.schedule(request).await?;
            println!("Alarm {id} scheduled ({outcome})");
        }
        AlarmCommands::List { json } => {
            let now = Utc::now();
            let all = alarms.list();
            if json {
                let items = all
                    .iter()
                    .map(|alarm| alarm_to_list_item(alarm, now))
                    .collect::<Vec<_>>();
                print_json(&items)?;
            } else if all.is_empty() {
                println!("No alarms scheduled.");
            } else {
                for line in format_alarm_lines(&all, now) {
                    println!("{line}");
                }
            }
        }
        AlarmCommands::Cancel { id } => {
            if !alarms.cancel(AlarmId(id)).await? {
                return Err(CliError::AlarmNotFound(id));
            }
            println!("Alarm {id} cancelled");
        }
        AlarmCommands::Snooze { id, minutes } => {
            ensure_alarm(engine, id)?;
            let outcome = alarms.snooze(AlarmId(id), minutes).await?;
            println!("Alarm {id} snoozed for {minutes} minutes ({outcome})");
        }
        AlarmCommands::Enable { id } => {
            ensure_alarm(engine, id)?;
            alarms.set_active(AlarmId(id), true).await?;
            println!("Alarm {id} enabled");
        }
        AlarmCommands::Disable { id } => {
            ensure_alarm(engine, id)?;
            alarms.set_active(AlarmId(id), false).await?;
            println!("Alarm {id} disabled");
        }
        AlarmCommands::Remind {
            event_id,
            title,
            at,
            details,
            before,
        } => {
            let event = EventReminder {
                event_id,
                title,
                details,
                starts_at: at,
            };
            let leads = if before.is_empty() {
                DEFAULT_REMINDER_MINUTES.to_vec()
            } else {
                before
            };
            let scheduled = alarms.schedule_reminders(&event, &leads).await?;
            if scheduled.is_empty() {
                println!("Event {event_id} starts too soon for any reminder");
            }
            for (id, outcome) in scheduled {
                let minutes = id.reminder_parts().map_or(0, |(_, minutes)| minutes);
                println!("Reminder {id} set {minutes} minutes before event {event_id} ({outcome})");
            }
        }
        AlarmCommands::Unremind { event_id } => {
            let cancelled = alarms.cancel_reminders(event_id).await?;
            println!("Cancelled {cancelled} reminders for event {event_id}");
        }
        AlarmCommands::Armed { json } => {
            let now = Utc::now();
            let armed = alarms.list_armed().await;
            if json {
                let items = armed
                    .iter()
                    .map(|alarm| alarm_to_list_item(alarm, now))
                    .collect::<Vec<_>>();
                print_json(&items)?;
            } else if armed.is_empty() {
                println!("No alarms armed on a notification backend.");
            } else {
                for line in format_alarm_lines(&armed, now) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

fn ensure_alarm(engine: &Engine, id: i64) -> Result<(), CliError> {
    engine
        .alarms()
        .get(AlarmId(id))
        .map(|_| ())
        .ok_or(CliError::AlarmNotFound(id))
}
