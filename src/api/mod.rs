pub mod client;
pub mod models;

use std::future::Future;

use crate::error::ApiError;
use models::{Conversation, Message, MessageType};

pub use client::HttpApi;

/// Messaging operations the sync engine needs from the server.
///
/// Futures must be `Send` so the engine can run them on spawned tasks.
pub trait ChatApi: Send + Sync + 'static {
    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    /// Returns the existing conversation when one already exists for the pair.
    fn create_conversation(
        &self,
        project_id: u64,
        freelancer_id: u64,
    ) -> impl Future<Output = Result<Conversation, ApiError>> + Send;

    /// Hides the conversation for the current viewer only.
    fn delete_conversation(
        &self,
        conversation_id: u64,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn list_messages(
        &self,
        conversation_id: u64,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn send_message(
        &self,
        conversation_id: u64,
        content: String,
        kind: MessageType,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn mark_read(&self, conversation_id: u64)
    -> impl Future<Output = Result<(), ApiError>> + Send;

    fn unread_count(&self) -> impl Future<Output = Result<u64, ApiError>> + Send;
}
