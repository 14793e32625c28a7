//! In-memory [`ChatApi`] used by the engine tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;

use crate::api::ChatApi;
use crate::api::models::{Conversation, Message, MessageType, UserRef};
use crate::error::ApiError;

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    /// Soft-deleted for the viewer; `relist` brings them back.
    hidden: Vec<Conversation>,
    messages: HashMap<u64, Vec<Message>>,
    next_id: u64,
    list_error: Option<ApiError>,
    send_error_after: Option<Duration>,
    delete_error: Option<ApiError>,
    mark_read_delay: Duration,
    list_fetches: usize,
    message_fetches: HashMap<u64, usize>,
    mark_read_requests: Vec<u64>,
}

pub struct FakeApi {
    viewer_id: u64,
    inner: Mutex<Inner>,
}

impl FakeApi {
    pub fn conversation(viewer_id: u64, id: u64, unread: u64) -> Conversation {
        Conversation {
            id,
            project_id: 100 + id,
            project: None,
            client_id: viewer_id,
            client: None,
            freelancer_id: 2,
            freelancer: Some(UserRef {
                id: 2,
                name: "Bo".into(),
                ..UserRef::default()
            }),
            unread_count: unread,
            updated_at: None,
        }
    }

    /// Conversations given as `(id, unread_count)`.
    pub fn with_conversations(viewer_id: u64, chats: &[(u64, u64)]) -> Self {
        let inner = Inner {
            conversations: chats
                .iter()
                .map(|&(id, unread)| Self::conversation(viewer_id, id, unread))
                .collect(),
            next_id: 1000,
            ..Inner::default()
        };
        Self {
            viewer_id,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake api lock poisoned")
    }

    pub fn fail_sends_after(&self, delay: Duration) {
        self.lock().send_error_after = Some(delay);
    }

    pub fn fail_listing(&self, error: Option<ApiError>) {
        self.lock().list_error = error;
    }

    pub fn fail_deletes(&self, error: Option<ApiError>) {
        self.lock().delete_error = error;
    }

    /// Server-side unread change, seen on the next list fetch.
    pub fn set_unread(&self, conversation_id: u64, unread: u64) {
        if let Some(conv) = self
            .lock()
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.unread_count = unread;
        }
    }

    /// A new message un-hides a deleted conversation on the server.
    pub fn relist(&self, conversation_id: u64) {
        let mut inner = self.lock();
        if let Some(pos) = inner.hidden.iter().position(|c| c.id == conversation_id) {
            let conv = inner.hidden.remove(pos);
            inner.conversations.push(conv);
        }
    }

    pub fn delay_mark_read(&self, delay: Duration) {
        self.lock().mark_read_delay = delay;
    }

    pub fn push_server_message(&self, conversation_id: u64, sender_id: u64, content: &str) {
        let mut inner = self.lock();
        inner.next_id += 1;
        let message = Message {
            id: inner.next_id,
            conversation_id,
            sender_id,
            content: content.into(),
            kind: MessageType::Text,
            file_url: String::new(),
            created_at: Utc::now(),
            read_at: None,
        };
        inner.messages.entry(conversation_id).or_default().push(message);
    }

    pub fn list_fetches(&self) -> usize {
        self.lock().list_fetches
    }

    pub fn message_fetches(&self, conversation_id: u64) -> usize {
        self.lock()
            .message_fetches
            .get(&conversation_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn mark_read_requests(&self) -> Vec<u64> {
        self.lock().mark_read_requests.clone()
    }
}

impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let mut inner = self.lock();
        inner.list_fetches += 1;
        match &inner.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(inner.conversations.clone()),
        }
    }

    async fn create_conversation(
        &self,
        project_id: u64,
        freelancer_id: u64,
    ) -> Result<Conversation, ApiError> {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .conversations
            .iter()
            .find(|c| c.project_id == project_id && c.freelancer_id == freelancer_id)
        {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let mut conv = Self::conversation(self.viewer_id, inner.next_id, 0);
        conv.project_id = project_id;
        conv.freelancer_id = freelancer_id;
        inner.conversations.insert(0, conv.clone());
        Ok(conv)
    }

    async fn delete_conversation(&self, conversation_id: u64) -> Result<(), ApiError> {
        let mut inner = self.lock();
        if let Some(err) = &inner.delete_error {
            return Err(err.clone());
        }
        let Some(pos) = inner.conversations.iter().position(|c| c.id == conversation_id) else {
            return Err(ApiError::NotFound("Chat not found".into()));
        };
        let conv = inner.conversations.remove(pos);
        inner.hidden.push(conv);
        Ok(())
    }

    async fn list_messages(&self, conversation_id: u64) -> Result<Vec<Message>, ApiError> {
        let mut inner = self.lock();
        *inner.message_fetches.entry(conversation_id).or_default() += 1;
        Ok(inner
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: u64,
        content: String,
        kind: MessageType,
    ) -> Result<Message, ApiError> {
        let fail_after = self.lock().send_error_after;
        if let Some(delay) = fail_after {
            tokio::time::sleep(delay).await;
            return Err(ApiError::from_status(500, "Failed to send message"));
        }

        let mut inner = self.lock();
        inner.next_id += 1;
        let message = Message {
            id: inner.next_id,
            conversation_id,
            sender_id: self.viewer_id,
            content,
            kind,
            file_url: String::new(),
            created_at: Utc::now(),
            read_at: None,
        };
        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, conversation_id: u64) -> Result<(), ApiError> {
        let delay = {
            let mut inner = self.lock();
            inner.mark_read_requests.push(conversation_id);
            inner.mark_read_delay
        };
        tokio::time::sleep(delay).await;
        if let Some(conv) = self
            .lock()
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.unread_count = 0;
        }
        Ok(())
    }

    async fn unread_count(&self) -> Result<u64, ApiError> {
        Ok(self.lock().conversations.iter().map(|c| c.unread_count).sum())
    }
}
