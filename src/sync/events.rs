use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::api::models::Conversation;
use crate::error::ApiError;
use crate::sync::reconcile::DisplayMessage;
use crate::sync::state::ChatSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
    Warning,
    Info,
}

/// A user-visible toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: Option<String>,
    pub message: String,
    pub duration: Duration,
}

impl Notification {
    pub fn error(title: impl Into<String>, err: &ApiError, duration: Duration) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: Some(title.into()),
            message: err.user_message(),
            duration,
        }
    }
}

/// Where the user arrived from, e.g. a "message this freelancer" link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationTarget {
    pub conversation_id: Option<u64>,
    pub project_id: Option<u64>,
    pub freelancer_id: Option<u64>,
}

impl NavigationTarget {
    pub fn is_empty(&self) -> bool {
        self.conversation_id.is_none() && (self.project_id.is_none() || self.freelancer_id.is_none())
    }
}

/// Commands accepted by the engine.
#[derive(Debug)]
pub enum EngineCommand {
    Select { conversation_id: u64 },
    ClearSelection,
    SetDraft(String),
    Submit,
    Delete { conversation_id: u64 },
    /// Open (creating if needed) the conversation with a freelancer about a project.
    OpenWith { project_id: u64, freelancer_id: u64 },
    /// Fetch the conversation list now instead of waiting for the next tick.
    RefreshChats,
    Snapshot(oneshot::Sender<ChatSnapshot>),
}

/// Events published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    ConversationsUpdated(Vec<Conversation>),
    SelectionChanged(Option<Conversation>),
    MessagesUpdated {
        conversation_id: Option<u64>,
        messages: Vec<DisplayMessage>,
    },
    DraftChanged { text: String, sending: bool },
    UnreadTotal(u64),
    Notification(Notification),
}
