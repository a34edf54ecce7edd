//! Database layer for Tidy

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{
    load_json, save_json, KeyValueStore, MemoryStore, SqliteStore, ALARMS_KEY, GEOFENCES_KEY,
    SYNC_CHANGES_KEY,
};
