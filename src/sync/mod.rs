//! Chat synchronization: pollers, optimistic sends and read state.

pub mod engine;
pub mod events;
pub mod reconcile;
pub mod state;
pub mod task;

#[cfg(test)]
mod fake;

pub use engine::{EngineClosed, EngineHandle, EngineOptions, spawn_engine};
pub use events::{EngineCommand, EngineEvent, NavigationTarget, Notification, NotificationLevel};
pub use reconcile::{DisplayMessage, MessageKey};
pub use state::ChatSnapshot;
