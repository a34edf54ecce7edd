//! Location-based alarms.

mod engine;
mod evaluate;

pub use engine::{GeofenceEngine, GeofenceStats, ImportReport, LocationProvider, MostTriggered};
pub use evaluate::{evaluate_geofences, GeofenceTrigger};
