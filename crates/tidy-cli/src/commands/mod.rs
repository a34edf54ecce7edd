pub mod alarm;
pub mod common;
pub mod completions;
pub mod config;
pub mod geofence;
pub mod run;
pub mod sync;
