//! Offline change queue and the backend client it replays against.
//!
//! Delivery is at-least-once. Element writes carry the caller-assigned id,
//! so a replay after a lost response resolves to the same upsert.

mod api;
mod queue;

pub use api::{HttpRemoteApi, NullRemote, RemoteApi, RemoteError, RemoteResult};
pub use queue::{DrainReport, RetryPolicy, SyncQueue, SyncStats};
