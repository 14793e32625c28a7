//! Client library for the gig marketplace REST API.
//!
//! [`api`] talks HTTP, [`sync`] keeps a conversation list and the open
//! conversation's history fresh by polling, and [`storage`] caches the list
//! so it can be shown before the first fetch completes.

pub mod api;
pub mod app;
pub mod error;
pub mod storage;
pub mod sync;
pub mod utils;

pub use api::{ChatApi, HttpApi};
pub use app::{AppState, Session, SyncSettings};
pub use error::{ApiError, ErrorCategory};
pub use sync::{EngineCommand, EngineEvent, EngineHandle, EngineOptions, spawn_engine};
