use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::models::{Conversation, Message, MessageType};
use crate::sync::reconcile::{self, DisplayMessage, PendingMessage};
use crate::utils::epoch_millis;

/// Allocates local ids from the wall clock, strictly increasing per session.
#[derive(Debug, Default)]
struct LocalIds {
    last: u64,
}

impl LocalIds {
    fn next(&mut self, now: DateTime<Utc>) -> u64 {
        let id = epoch_millis(now).max(self.last + 1);
        self.last = id;
        id
    }
}

/// Why a submit did not start a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejected {
    EmptyDraft,
    SendInFlight,
    NoSelection,
}

/// A send that was materialized locally and must now go to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSend {
    pub local_id: u64,
    pub conversation_id: u64,
    pub content: String,
    pub kind: MessageType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// A different conversation is now selected; pollers must restart.
    Changed,
    /// It was already the selected conversation.
    Unchanged,
    /// Not in the conversation list.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListOutcome {
    /// The selection object was swapped for its refreshed copy.
    pub selection_refreshed: bool,
}

/// Read-only view of the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSnapshot {
    pub conversations: Vec<Conversation>,
    pub selected: Option<Conversation>,
    pub messages: Vec<DisplayMessage>,
    pub draft: String,
    pub sending: bool,
    pub unread_total: u64,
    /// Conversation the message poller is currently running for.
    pub polling: Option<u64>,
}

/// All chat sync state. Only the engine task mutates it.
#[derive(Debug)]
pub struct ChatSyncState {
    viewer_id: u64,
    reconcile_window: Duration,
    conversations: Vec<Conversation>,
    selected: Option<Conversation>,
    server_messages: Vec<Message>,
    pending: Vec<PendingMessage>,
    displayed: Vec<DisplayMessage>,
    draft: String,
    sending: bool,
    unread_total: u64,
    local_ids: LocalIds,
}

impl ChatSyncState {
    pub fn new(viewer_id: u64, reconcile_window: Duration) -> Self {
        Self {
            viewer_id,
            reconcile_window,
            conversations: Vec::new(),
            selected: None,
            server_messages: Vec::new(),
            pending: Vec::new(),
            displayed: Vec::new(),
            draft: String::new(),
            sending: false,
            unread_total: 0,
            local_ids: LocalIds::default(),
        }
    }

    pub fn viewer_id(&self) -> u64 {
        self.viewer_id
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.as_ref()
    }

    pub fn selected_id(&self) -> Option<u64> {
        self.selected.as_ref().map(|c| c.id)
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.displayed
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn unread_total(&self) -> u64 {
        self.unread_total
    }

    pub fn set_unread_total(&mut self, total: u64) {
        self.unread_total = total;
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Replace the list with a fresh server copy, keeping the selection.
    ///
    /// The selection is re-resolved by id. When the id is missing from the new
    /// list the old selection object stays as it was.
    /// Conversations that do not involve the viewer are dropped.
    pub fn apply_conversations(&mut self, mut list: Vec<Conversation>) -> ListOutcome {
        let viewer_id = self.viewer_id;
        list.retain(|c| {
            let mine = c.involves(viewer_id);
            if !mine {
                log::warn!("ignoring conversation {} without user {viewer_id}", c.id);
            }
            mine
        });
        self.conversations = list;
        let mut outcome = ListOutcome::default();
        if let Some(current) = self.selected.as_mut()
            && let Some(fresh) = self.conversations.iter().find(|c| c.id == current.id)
            && fresh != current
        {
            *current = fresh.clone();
            outcome.selection_refreshed = true;
        }
        outcome
    }

    pub fn select(&mut self, conversation_id: u64) -> SelectOutcome {
        if self.selected_id() == Some(conversation_id) {
            return SelectOutcome::Unchanged;
        }
        let Some(conv) = self
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
        else {
            return SelectOutcome::Unknown;
        };
        self.selected = Some(conv);
        self.clear_messages();
        self.mark_read_local(conversation_id);
        SelectOutcome::Changed
    }

    /// Put `conv` at the front of the list unless already listed, then select it.
    pub fn insert_and_select(&mut self, conv: Conversation) -> SelectOutcome {
        if !self.conversations.iter().any(|c| c.id == conv.id) {
            self.conversations.insert(0, conv.clone());
        }
        self.select(conv.id)
    }

    pub fn clear_selection(&mut self) -> bool {
        let had = self.selected.take().is_some();
        self.clear_messages();
        had
    }

    fn clear_messages(&mut self) {
        self.server_messages.clear();
        self.pending.clear();
        self.displayed.clear();
    }

    /// Zero the unread counter for a conversation in the list and selection.
    pub fn mark_read_local(&mut self, conversation_id: u64) {
        for conv in self
            .conversations
            .iter_mut()
            .chain(self.selected.iter_mut())
            .filter(|c| c.id == conversation_id)
        {
            conv.unread_count = 0;
        }
    }

    /// Merge a server history response. Returns false for a stale response.
    pub fn apply_messages(&mut self, conversation_id: u64, messages: Vec<Message>) -> bool {
        if self.selected_id() != Some(conversation_id) {
            return false;
        }
        self.server_messages = messages;
        self.reconcile();
        true
    }

    /// Reconcile against fresh server history. Only a fetch may drop placeholders.
    fn reconcile(&mut self) {
        self.displayed = reconcile::merge(
            &self.server_messages,
            &mut self.pending,
            self.reconcile_window,
        );
    }

    fn redisplay(&mut self) {
        self.displayed = reconcile::display(&self.server_messages, &self.pending);
    }

    /// Materialize the draft as a pending message and clear the draft.
    pub fn begin_send(&mut self, now: DateTime<Utc>) -> Result<OutgoingSend, SubmitRejected> {
        if self.draft.trim().is_empty() {
            return Err(SubmitRejected::EmptyDraft);
        }
        if self.sending {
            return Err(SubmitRejected::SendInFlight);
        }
        let conversation_id = self.selected_id().ok_or(SubmitRejected::NoSelection)?;

        let content = std::mem::take(&mut self.draft);
        let local_id = self.local_ids.next(now);
        self.pending.push(PendingMessage {
            local_id,
            conversation_id,
            sender_id: self.viewer_id,
            content: content.clone(),
            kind: MessageType::Text,
            created_at: now,
        });
        self.sending = true;
        self.redisplay();
        Ok(OutgoingSend {
            local_id,
            conversation_id,
            content,
            kind: MessageType::Text,
        })
    }

    /// The server accepted the send; the next poll reconciles the placeholder.
    pub fn send_succeeded(&mut self) {
        self.sending = false;
    }

    /// Roll back a failed send and put its text back into the draft.
    pub fn send_failed(&mut self, send: &OutgoingSend) {
        self.sending = false;
        let before = self.pending.len();
        self.pending.retain(|p| p.local_id != send.local_id);
        if self.pending.len() != before {
            self.redisplay();
        }
        self.draft = send.content.clone();
    }

    /// Drop a conversation locally. Returns true when it was the selection.
    pub fn remove_conversation(&mut self, conversation_id: u64) -> bool {
        self.conversations.retain(|c| c.id != conversation_id);
        if self.selected_id() == Some(conversation_id) {
            self.clear_selection();
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self, polling: Option<u64>) -> ChatSnapshot {
        ChatSnapshot {
            conversations: self.conversations.clone(),
            selected: self.selected.clone(),
            messages: self.displayed.clone(),
            draft: self.draft.clone(),
            sending: self.sending,
            unread_total: self.unread_total,
            polling,
        }
    }
}
