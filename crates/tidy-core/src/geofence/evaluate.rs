//! Edge detection over a set of geofences.

use chrono::{DateTime, Utc};

use crate::geo::haversine;
use crate::models::{FireEvent, Geofence, GeofenceId, Position};

/// A geofence transition that passed every gate and should be announced
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceTrigger {
    pub geofence_id: GeofenceId,
    pub entering: bool,
    pub distance_meters: f64,
    pub event: FireEvent,
}

/// Evaluate one position against every active geofence.
///
/// Updates `triggered`, `state_known`, `fire_count` and `last_fired_at` in
/// place and returns the transitions that fire. A geofence observed for the
/// first time only records its containment. `triggered` always follows the
/// observed containment, including when the repeat limit blocks the fire.
pub fn evaluate_geofences(
    geofences: &mut [Geofence],
    position: &Position,
    now: DateTime<Utc>,
) -> Vec<GeofenceTrigger> {
    let point = position.point();
    if !point.is_valid() {
        tracing::warn!(
            "Ignoring invalid position ({}, {})",
            position.latitude,
            position.longitude
        );
        return Vec::new();
    }

    let mut triggers = Vec::new();
    for geofence in geofences.iter_mut().filter(|geofence| geofence.active) {
        let distance = haversine(point, geofence.center);
        let inside = distance <= geofence.radius_meters;

        if !geofence.state_known {
            geofence.triggered = inside;
            geofence.state_known = true;
            continue;
        }

        let crossed = inside != geofence.triggered;
        geofence.triggered = inside;
        if !crossed || !geofence.trigger_type.fires_on(inside) {
            continue;
        }
        if geofence.limit_reached() {
            tracing::debug!(
                "Geofence {} reached its repeat limit of {}",
                geofence.id,
                geofence.repeat_limit
            );
            continue;
        }

        geofence.fire_count += 1;
        geofence.last_fired_at = Some(now);
        triggers.push(GeofenceTrigger {
            geofence_id: geofence.id,
            entering: inside,
            distance_meters: distance,
            event: FireEvent::for_geofence(geofence, inside, now),
        });
    }
    triggers
}
