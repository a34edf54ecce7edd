//! tidy-core - Core library for Tidy
//!
//! Local alarm scheduling, geofence evaluation and the offline change queue
//! shared by every Tidy host. Platform facilities (exact alarms, local
//! notifications, geolocation, the backend) are injected through traits.

pub mod alarm;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod geofence;
pub mod models;
pub mod notify;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use services::Engine;
