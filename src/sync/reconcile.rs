//! Merging server history with optimistic local sends.
//!
//! A pending message is dropped once the server returns a message with the
//! same sender and content whose timestamp is within the reconcile window of
//! the pending one. Two identical sends inside one window can therefore
//! collapse into a single server echo; messages echoed outside the window show
//! twice until the window is widened.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::api::models::{Message, MessageType};

/// Identity of a displayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKey {
    /// Local placeholder, keyed by a session-unique local id.
    Pending(u64),
    /// Server-assigned id.
    Confirmed(u64),
}

impl MessageKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// An optimistic message that has not been matched by the server yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: u64,
    pub conversation_id: u64,
    pub sender_id: u64,
    pub content: String,
    pub kind: MessageType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    pub key: MessageKey,
    pub conversation_id: u64,
    pub sender_id: u64,
    pub content: String,
    pub kind: MessageType,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<&Message> for DisplayMessage {
    fn from(msg: &Message) -> Self {
        Self {
            key: MessageKey::Confirmed(msg.id),
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            content: msg.content.clone(),
            kind: msg.kind,
            created_at: msg.created_at,
            read_at: msg.read_at,
        }
    }
}

impl From<&PendingMessage> for DisplayMessage {
    fn from(msg: &PendingMessage) -> Self {
        Self {
            key: MessageKey::Pending(msg.local_id),
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            content: msg.content.clone(),
            kind: msg.kind,
            created_at: msg.created_at,
            read_at: None,
        }
    }
}

fn window_delta(window: Duration) -> TimeDelta {
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

/// Whether some server message echoes `pending`.
pub fn is_reconciled(pending: &PendingMessage, server: &[Message], window: Duration) -> bool {
    let window = window_delta(window);
    server.iter().any(|msg| {
        msg.sender_id == pending.sender_id
            && msg.content == pending.content
            && (msg.created_at - pending.created_at).abs() <= window
    })
}

/// Drop reconciled entries from `pending` and build the display list.
pub fn merge(
    server: &[Message],
    pending: &mut Vec<PendingMessage>,
    window: Duration,
) -> Vec<DisplayMessage> {
    let before = pending.len();
    pending.retain(|p| !is_reconciled(p, server, window));
    if pending.len() != before {
        log::debug!(
            "reconciled {} optimistic message(s), {} still pending",
            before - pending.len(),
            pending.len()
        );
    }

    display(server, pending)
}

/// Build the display list without reconciling.
///
/// Sorted by creation time; ties keep server messages first and pending ones
/// in send order.
pub fn display(server: &[Message], pending: &[PendingMessage]) -> Vec<DisplayMessage> {
    let mut out: Vec<DisplayMessage> = server
        .iter()
        .map(DisplayMessage::from)
        .chain(pending.iter().map(DisplayMessage::from))
        .collect();
    out.sort_by_key(|m| m.created_at);
    out
}
