use std::io::{self, Write};

use chrono::Utc;
use tidy_core::geo::GeoPoint;
use tidy_core::models::{GeofenceDraft, Position, TriggerType};
use tidy_core::Engine;

use crate::cli::GeofenceCommands;
use crate::commands::common::{format_geofence_lines, print_json, resolve_geofence_id};
use crate::error::CliError;

pub async fn run_geofence(command: GeofenceCommands, engine: &Engine) -> Result<(), CliError> {
    let geofences = engine.geofences();
    match command {
        GeofenceCommands::Add {
            lat,
            lon,
            radius,
            trigger,
            name,
            message,
            limit,
        } => {
            let mut draft =
                GeofenceDraft::new(GeoPoint::new(lat, lon), radius, trigger.parse::<TriggerType>()?);
            if let Some(name) = name {
                draft.name = name;
            }
            if let Some(message) = message {
                draft.message = message;
            }
            draft.repeat_limit = limit;
            let geofence = geofences.create(draft).await?;
            println!("{}", geofence.id);
        }
        GeofenceCommands::List { json } => {
            let all = geofences.list();
            if json {
                print_json(&all)?;
            } else if all.is_empty() {
                println!("No geofences defined.");
            } else {
                for line in format_geofence_lines(&all) {
                    println!("{line}");
                }
            }
        }
        GeofenceCommands::Delete { id } => {
            let id = resolve_geofence_id(&id, &geofences.list())?;
            if !geofences.delete(id).await? {
                return Err(CliError::GeofenceNotFound(id.to_string()));
            }
            println!("Geofence {id} deleted");
        }
        GeofenceCommands::Enable { id } => {
            let id = resolve_geofence_id(&id, &geofences.list())?;
            geofences.set_active(id, true).await?;
            println!("Geofence {id} enabled");
        }
        GeofenceCommands::Disable { id } => {
            let id = resolve_geofence_id(&id, &geofences.list())?;
            geofences.set_active(id, false).await?;
            println!("Geofence {id} disabled");
        }
        GeofenceCommands::Stats { json } => {
            let stats = geofences.stats();
            if json {
                print_json(&stats)?;
            } else {
                println!("Total:     {}", stats.total);
                println!("Active:    {}", stats.active);
                println!("Triggered: {}", stats.triggered);
                if let Some(most) = stats.most_triggered {
                    println!("Most triggered: {} ({} times)", most.name, most.fire_count);
                }
            }
        }
        GeofenceCommands::Export { output } => {
            let rendered = geofences.export_json()?;
            if let Some(path) = output {
                std::fs::write(&path, rendered)?;
                println!("{}", path.display());
            } else {
                io::stdout().write_all(rendered.as_bytes())?;
                println!();
            }
        }
        GeofenceCommands::Import { path } => {
            let raw = std::fs::read_to_string(&path)?;
            let report = geofences.import_json(&raw).await?;
            println!(
                "Imported {} geofences ({} skipped)",
                report.imported, report.skipped
            );
        }
        GeofenceCommands::Check { lat, lon } => {
            let events = geofences
                .evaluate(Position::new(GeoPoint::new(lat, lon), Utc::now()))
                .await;
            if events.is_empty() {
                println!("No geofence transitions.");
            }
            for event in events {
                println!("{}: {}", event.title, event.body);
            }
        }
    }
    Ok(())
}
