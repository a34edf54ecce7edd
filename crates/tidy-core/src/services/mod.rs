//! Long-lived services shared across hosts.

mod engine;

pub use engine::Engine;
