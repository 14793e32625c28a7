//! The chat sync engine task.
//!
//! One task owns [`ChatSyncState`]. User commands arrive on one channel;
//! poll ticks and finished requests arrive on another. Handlers never await
//! the network: requests run on spawned tasks and report back as inputs.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::api::ChatApi;
use crate::api::models::{Conversation, Message};
use crate::app::{Session, SyncSettings};
use crate::error::ApiError;
use crate::storage::ChatCache;
use crate::sync::events::{
    EngineCommand, EngineEvent, NavigationTarget, Notification, NotificationLevel,
};
use crate::sync::state::{ChatSnapshot, ChatSyncState, OutgoingSend, SelectOutcome};
use crate::sync::task::PollSlot;

const COMMAND_BUFFER: usize = 64;
const INTERNAL_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 512;
const CACHED_CHATS_LIMIT: usize = 200;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("chat engine has stopped")]
pub struct EngineClosed;

/// Optional inputs for [`spawn_engine`].
#[derive(Default)]
pub struct EngineOptions {
    pub settings: SyncSettings,
    pub navigation: NavigationTarget,
    pub cache: Option<ChatCache>,
}

/// Cloneable handle to a running engine. The engine stops once every handle is dropped.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> Result<(), EngineClosed> {
        self.commands.send(command).await.map_err(|_| EngineClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn select(&self, conversation_id: u64) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Select { conversation_id }).await
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), EngineClosed> {
        self.send(EngineCommand::SetDraft(text.into())).await
    }

    pub async fn submit(&self) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Submit).await
    }

    pub async fn delete(&self, conversation_id: u64) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Delete { conversation_id }).await
    }

    pub async fn snapshot(&self) -> Result<ChatSnapshot, EngineClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| EngineClosed)
    }
}

/// Start the engine on the current tokio runtime.
pub fn spawn_engine<A: ChatApi>(
    api: Arc<A>,
    session: &Session,
    options: EngineOptions,
) -> EngineHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);

    let navigation = (!options.navigation.is_empty()).then_some(options.navigation);
    let engine = ChatEngine {
        api,
        is_client: session.is_client(),
        settings: options.settings,
        state: ChatSyncState::new(session.viewer_id(), options.settings.reconcile_window),
        cache: options.cache,
        navigation,
        commands: command_rx,
        internal_tx,
        internal_rx,
        events: event_tx.clone(),
        chat_poll: PollSlot::new("chat list"),
        message_poll: PollSlot::new("messages"),
        polling: None,
        auth_notified: false,
    };
    tokio::spawn(engine.run());

    EngineHandle {
        commands: command_tx,
        events: event_tx,
    }
}

/// Ticks and request completions fed back into the engine.
#[derive(Debug)]
enum Internal {
    ChatListTick {
        generation: u64,
    },
    MessageTick {
        generation: u64,
        conversation_id: u64,
    },
    ChatsLoaded(Result<Vec<Conversation>, ApiError>),
    UnreadLoaded(Result<u64, ApiError>),
    MessagesLoaded {
        conversation_id: u64,
        result: Result<Vec<Message>, ApiError>,
    },
    SendFinished {
        send: OutgoingSend,
        result: Result<Message, ApiError>,
    },
    MarkedRead {
        conversation_id: u64,
        result: Result<(), ApiError>,
    },
    Deleted {
        conversation_id: u64,
        result: Result<(), ApiError>,
    },
    Opened(Result<Conversation, ApiError>),
}

struct ChatEngine<A: ChatApi> {
    api: Arc<A>,
    is_client: bool,
    settings: SyncSettings,
    state: ChatSyncState,
    cache: Option<ChatCache>,
    /// Applied once, after the first successful list load.
    navigation: Option<NavigationTarget>,
    commands: mpsc::Receiver<EngineCommand>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    events: broadcast::Sender<EngineEvent>,
    chat_poll: PollSlot,
    message_poll: PollSlot,
    polling: Option<u64>,
    auth_notified: bool,
}

impl<A: ChatApi> ChatEngine<A> {
    async fn run(mut self) {
        info!("chat engine started for user {}", self.state.viewer_id());
        self.publish_cached();
        self.chat_poll.start(
            self.settings.chat_list_interval,
            self.internal_tx.clone(),
            |generation| Internal::ChatListTick { generation },
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(input) = self.internal_rx.recv() => self.handle_internal(input),
            }
        }

        self.message_poll.cancel();
        self.chat_poll.cancel();
        info!("chat engine stopped");
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn notify(&self, notification: Notification) {
        self.emit(EngineEvent::Notification(notification));
    }

    fn spawn_request<F, Fut>(&self, request: F)
    where
        F: FnOnce(Arc<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Internal> + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let input = request(api).await;
            let _ = tx.send(input).await;
        });
    }

    fn publish_cached(&mut self) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        match cache.load(Some(CACHED_CHATS_LIMIT)) {
            Ok(cached) if !cached.is_empty() => {
                match cache.cached_at() {
                    Ok(Some(at)) => debug!("showing {} cached conversation(s) from {at}", cached.len()),
                    _ => debug!("showing {} cached conversation(s)", cached.len()),
                }
                self.state.apply_conversations(cached);
                self.emit(EngineEvent::ConversationsUpdated(
                    self.state.conversations().to_vec(),
                ));
            }
            Ok(_) => {}
            Err(err) => warn!("conversation cache unreadable: {err}"),
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Select { conversation_id } => self.select(conversation_id),
            EngineCommand::ClearSelection => {
                if self.state.clear_selection() {
                    self.selection_cleared();
                }
            }
            EngineCommand::SetDraft(text) => self.state.set_draft(text),
            EngineCommand::Submit => self.submit(),
            EngineCommand::Delete { conversation_id } => {
                self.spawn_request(move |api| async move {
                    Internal::Deleted {
                        conversation_id,
                        result: api.delete_conversation(conversation_id).await,
                    }
                });
            }
            EngineCommand::OpenWith {
                project_id,
                freelancer_id,
            } => self.open_with(project_id, freelancer_id),
            EngineCommand::RefreshChats => self.fetch_chats(),
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot(self.polling));
            }
        }
    }

    fn handle_internal(&mut self, input: Internal) {
        match input {
            Internal::ChatListTick { generation } => {
                if self.chat_poll.is_current(generation) {
                    self.fetch_chats();
                }
            }
            Internal::MessageTick {
                generation,
                conversation_id,
            } => {
                if self.message_poll.is_current(generation)
                    && self.state.selected_id() == Some(conversation_id)
                {
                    self.fetch_messages(conversation_id);
                } else {
                    debug!("dropping stale message tick for conversation {conversation_id}");
                }
            }
            Internal::ChatsLoaded(Ok(list)) => self.chats_loaded(list),
            Internal::ChatsLoaded(Err(err)) => self.poll_failed("chat list", &err),
            Internal::UnreadLoaded(Ok(total)) => {
                self.state.set_unread_total(total);
                self.emit(EngineEvent::UnreadTotal(total));
            }
            Internal::UnreadLoaded(Err(err)) => self.poll_failed("unread count", &err),
            Internal::MessagesLoaded {
                conversation_id,
                result: Ok(messages),
            } => {
                self.auth_notified = false;
                if self.state.apply_messages(conversation_id, messages) {
                    self.emit_messages();
                } else {
                    debug!("ignoring messages for unselected conversation {conversation_id}");
                }
            }
            Internal::MessagesLoaded {
                result: Err(err), ..
            } => self.poll_failed("messages", &err),
            Internal::SendFinished { send, result } => self.send_finished(send, result),
            Internal::MarkedRead {
                conversation_id,
                result,
            } => match result {
                Ok(()) => debug!("conversation {conversation_id} marked read"),
                Err(err) => warn!("mark read failed for conversation {conversation_id}: {err}"),
            },
            Internal::Deleted {
                conversation_id,
                result,
            } => self.deleted(conversation_id, result),
            Internal::Opened(Ok(conv)) => {
                let id = conv.id;
                match self.state.insert_and_select(conv) {
                    SelectOutcome::Changed => self.selection_changed(id),
                    _ => self.emit(EngineEvent::ConversationsUpdated(
                        self.state.conversations().to_vec(),
                    )),
                }
            }
            Internal::Opened(Err(err)) => {
                warn!("could not open conversation: {err}");
                self.notify(Notification::error(
                    "Could not start conversation",
                    &err,
                    self.settings.notification_duration,
                ));
            }
        }
    }

    fn fetch_chats(&self) {
        self.spawn_request(|api| async move { Internal::ChatsLoaded(api.list_conversations().await) });
        self.spawn_request(|api| async move { Internal::UnreadLoaded(api.unread_count().await) });
    }

    fn fetch_messages(&self, conversation_id: u64) {
        self.spawn_request(move |api| async move {
            Internal::MessagesLoaded {
                conversation_id,
                result: api.list_messages(conversation_id).await,
            }
        });
    }

    fn poll_failed(&mut self, what: &str, err: &ApiError) {
        warn!("{what} refresh failed: {err}");
        if *err == ApiError::Unauthorized && !self.auth_notified {
            self.auth_notified = true;
            self.notify(Notification {
                level: NotificationLevel::Warning,
                title: None,
                message: err.user_message(),
                duration: self.settings.notification_duration,
            });
        }
    }

    fn chats_loaded(&mut self, list: Vec<Conversation>) {
        self.auth_notified = false;
        let outcome = self.state.apply_conversations(list);
        if let Some(cache) = self.cache.as_mut()
            && let Err(err) = cache.replace_all(self.state.conversations())
        {
            warn!("conversation cache write failed: {err}");
        }
        self.emit(EngineEvent::ConversationsUpdated(
            self.state.conversations().to_vec(),
        ));
        if outcome.selection_refreshed {
            self.emit(EngineEvent::SelectionChanged(self.state.selected().cloned()));
        }
        if let Some(target) = self.navigation.take() {
            self.navigate(target);
        }
    }

    fn navigate(&mut self, target: NavigationTarget) {
        if let Some(id) = target.conversation_id {
            if self.state.conversations().iter().any(|c| c.id == id) {
                self.select(id);
            } else {
                warn!("conversation {id} from navigation is not in the list");
            }
        } else if let (Some(project_id), Some(freelancer_id)) =
            (target.project_id, target.freelancer_id)
        {
            if self.is_client {
                self.open_with(project_id, freelancer_id);
            } else {
                debug!("only clients open conversations from project links");
            }
        }
    }

    fn open_with(&self, project_id: u64, freelancer_id: u64) {
        if !self.is_client {
            self.notify(Notification {
                level: NotificationLevel::Warning,
                title: None,
                message: "Only clients can start a conversation.".to_owned(),
                duration: self.settings.notification_duration,
            });
            return;
        }
        self.spawn_request(move |api| async move {
            Internal::Opened(api.create_conversation(project_id, freelancer_id).await)
        });
    }

    fn select(&mut self, conversation_id: u64) {
        match self.state.select(conversation_id) {
            SelectOutcome::Changed => self.selection_changed(conversation_id),
            SelectOutcome::Unchanged => {}
            SelectOutcome::Unknown => warn!("cannot select unknown conversation {conversation_id}"),
        }
    }

    /// Restart the message poller and mark the new selection read.
    fn selection_changed(&mut self, conversation_id: u64) {
        self.message_poll.start(
            self.settings.message_interval,
            self.internal_tx.clone(),
            move |generation| Internal::MessageTick {
                generation,
                conversation_id,
            },
        );
        self.polling = Some(conversation_id);

        self.spawn_request(move |api| async move {
            Internal::MarkedRead {
                conversation_id,
                result: api.mark_read(conversation_id).await,
            }
        });

        self.emit(EngineEvent::SelectionChanged(self.state.selected().cloned()));
        self.emit(EngineEvent::ConversationsUpdated(
            self.state.conversations().to_vec(),
        ));
        self.emit_messages();
    }

    fn selection_cleared(&mut self) {
        self.message_poll.cancel();
        self.polling = None;
        self.emit(EngineEvent::SelectionChanged(None));
        self.emit_messages();
    }

    fn emit_messages(&self) {
        self.emit(EngineEvent::MessagesUpdated {
            conversation_id: self.state.selected_id(),
            messages: self.state.messages().to_vec(),
        });
    }

    fn emit_draft(&self) {
        self.emit(EngineEvent::DraftChanged {
            text: self.state.draft().to_owned(),
            sending: self.state.is_sending(),
        });
    }

    fn submit(&mut self) {
        let send = match self.state.begin_send(Utc::now()) {
            Ok(send) => send,
            Err(reason) => {
                debug!("submit ignored: {reason:?}");
                return;
            }
        };
        self.emit_messages();
        self.emit_draft();

        self.spawn_request(move |api| async move {
            let result = api
                .send_message(send.conversation_id, send.content.clone(), send.kind)
                .await;
            Internal::SendFinished { send, result }
        });
    }

    fn send_finished(&mut self, send: OutgoingSend, result: Result<Message, ApiError>) {
        match result {
            Ok(message) => {
                debug!(
                    "message {} accepted for local {}",
                    message.id, send.local_id
                );
                self.state.send_succeeded();
            }
            Err(err) => {
                warn!("send to conversation {} failed: {err}", send.conversation_id);
                self.state.send_failed(&send);
                if self.state.selected_id() == Some(send.conversation_id) {
                    self.emit_messages();
                }
                self.notify(Notification::error(
                    "Failed to send message",
                    &err,
                    self.settings.notification_duration,
                ));
            }
        }
        self.emit_draft();
    }

    fn deleted(&mut self, conversation_id: u64, result: Result<(), ApiError>) {
        if let Err(err) = result {
            warn!("delete of conversation {conversation_id} failed: {err}");
            self.notify(Notification::error(
                "Failed to delete conversation",
                &err,
                self.settings.notification_duration,
            ));
            return;
        }

        let was_selected = self.state.remove_conversation(conversation_id);
        if let Some(cache) = self.cache.as_ref()
            && let Err(err) = cache.remove(conversation_id)
        {
            warn!("conversation cache delete failed: {err}");
        }
        self.emit(EngineEvent::ConversationsUpdated(
            self.state.conversations().to_vec(),
        ));
        if was_selected {
            self.selection_cleared();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::api::models::{Role, User};
    use crate::sync::fake::FakeApi;
    use crate::sync::reconcile::MessageKey;

    const VIEWER: u64 = 1;

    fn session(role: Role) -> Session {
        Session::new(
            User {
                id: VIEWER,
                name: "Amy".into(),
                role,
                ..User::default()
            },
            "token",
        )
    }

    fn start(api: &Arc<FakeApi>, options: EngineOptions) -> EngineHandle {
        spawn_engine(Arc::clone(api), &session(Role::Client), options)
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn error_notifications(events: &[EngineEvent]) -> usize {
        events
            .iter()
            .filter(|e| {
                matches!(e, EngineEvent::Notification(n) if n.level == NotificationLevel::Error)
            })
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_another_conversation_stops_previous_poller() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0), (8, 0)]));
        let handle = start(&api, EngineOptions::default());
        settle().await;

        handle.select(7).await.expect("select 7");
        sleep(Duration::from_secs(7)).await;
        assert!(api.message_fetches(7) >= 3);

        handle.select(8).await.expect("select 8");
        settle().await;
        let fetched_a = api.message_fetches(7);
        sleep(Duration::from_secs(30)).await;

        assert_eq!(api.message_fetches(7), fetched_a);
        assert!(api.message_fetches(8) >= 10);
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.polling, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_rolls_back_with_one_error() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        api.fail_sends_after(Duration::from_secs(1));
        let handle = start(&api, EngineOptions::default());
        settle().await;
        handle.select(7).await.expect("select");
        settle().await;

        let mut events = handle.subscribe();
        handle.set_draft("hello").await.expect("draft");
        handle.submit().await.expect("submit");
        let before = handle.snapshot().await.expect("snapshot");
        assert_eq!(before.messages.len(), 1);
        assert!(before.messages[0].key.is_pending());
        assert_eq!(before.draft, "");
        assert!(before.sending);

        sleep(Duration::from_secs(2)).await;
        let after = handle.snapshot().await.expect("snapshot");
        assert!(after.messages.is_empty());
        assert_eq!(after.draft, "hello");
        assert!(!after.sending);
        assert_eq!(error_notifications(&drain(&mut events)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_send_is_reconciled_by_next_poll() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        let handle = start(&api, EngineOptions::default());
        settle().await;
        handle.select(7).await.expect("select");
        settle().await;

        handle.set_draft("hi").await.expect("draft");
        handle.submit().await.expect("submit");
        sleep(Duration::from_secs(4)).await;

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.messages.len(), 1);
        assert!(matches!(snapshot.messages[0].key, MessageKey::Confirmed(_)));
        assert_eq!(snapshot.messages[0].content, "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn selection_marks_read_before_server_answers() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 5), (8, 2)]));
        api.delay_mark_read(Duration::from_secs(10));
        let handle = start(&api, EngineOptions::default());
        settle().await;

        handle.select(7).await.expect("select");
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.selected.map(|c| c.unread_count), Some(0));
        let unread: Vec<(u64, u64)> = snapshot
            .conversations
            .iter()
            .map(|c| (c.id, c.unread_count))
            .collect();
        assert_eq!(unread, vec![(7, 0), (8, 2)]);

        settle().await;
        assert_eq!(api.mark_read_requests(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_selected_conversation_clears_it() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0), (8, 0)]));
        api.push_server_message(7, 2, "hello");
        let handle = start(&api, EngineOptions::default());
        settle().await;
        handle.select(7).await.expect("select");
        settle().await;
        assert_eq!(handle.snapshot().await.expect("snapshot").messages.len(), 1);

        handle.delete(7).await.expect("delete");
        settle().await;
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert!(snapshot.selected.is_none());
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.polling, None);
        let ids: Vec<u64> = snapshot.conversations.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![8]);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshed_selection_copy_does_not_reload_messages() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0), (8, 0)]));
        let handle = start(&api, EngineOptions::default());
        settle().await;
        handle.select(7).await.expect("select");
        settle().await;
        let fetched = api.message_fetches(7);
        let mut events = handle.subscribe();

        api.set_unread(7, 4);
        handle.send(EngineCommand::RefreshChats).await.expect("refresh");
        settle().await;

        assert_eq!(api.message_fetches(7), fetched);
        let refreshed: Vec<Conversation> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::SelectionChanged(Some(conv)) => Some(conv),
                _ => None,
            })
            .collect();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].unread_count, 4);

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.selected.map(|c| c.unread_count), Some(4));
        assert_eq!(snapshot.polling, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_leaves_state_and_reports_once() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0), (8, 0)]));
        api.fail_deletes(Some(ApiError::from_status(500, "Failed to delete chat")));
        let handle = start(&api, EngineOptions::default());
        settle().await;
        handle.select(7).await.expect("select");
        settle().await;
        let mut events = handle.subscribe();

        handle.delete(7).await.expect("delete");
        settle().await;

        let snapshot = handle.snapshot().await.expect("snapshot");
        let ids: Vec<u64> = snapshot.conversations.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 8]);
        assert_eq!(snapshot.selected.map(|c| c.id), Some(7));
        assert_eq!(snapshot.polling, Some(7));
        assert_eq!(error_notifications(&drain(&mut events)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_conversation_returns_when_server_lists_it_again() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0), (8, 0)]));
        let handle = start(&api, EngineOptions::default());
        settle().await;

        handle.delete(8).await.expect("delete");
        settle().await;
        let ids: Vec<u64> = handle
            .snapshot()
            .await
            .expect("snapshot")
            .conversations
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![7]);

        api.relist(8);
        handle.send(EngineCommand::RefreshChats).await.expect("refresh");
        settle().await;
        let ids: Vec<u64> = handle
            .snapshot()
            .await
            .expect("snapshot")
            .conversations
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![7, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn resending_confirmed_text_shows_new_message_at_once() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        api.push_server_message(7, VIEWER, "ok");
        let handle = start(&api, EngineOptions::default());
        settle().await;
        handle.select(7).await.expect("select");
        settle().await;
        assert_eq!(handle.snapshot().await.expect("snapshot").messages.len(), 1);

        handle.set_draft("ok").await.expect("draft");
        handle.submit().await.expect("submit");
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.messages.len(), 2);
        assert!(snapshot.messages.iter().any(|m| m.key.is_pending()));
    }

    #[tokio::test(start_paused = true)]
    async fn list_refresh_failure_keeps_previous_list() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        let handle = start(&api, EngineOptions::default());
        settle().await;
        let mut events = handle.subscribe();

        api.fail_listing(Some(ApiError::Unauthorized));
        sleep(Duration::from_secs(50)).await;

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.conversations.len(), 1);
        let warnings = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Notification(_)))
            .count();
        assert_eq!(warnings, 1);
        assert!(api.list_fetches() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_creates_and_selects_conversation_for_clients() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        let options = EngineOptions {
            navigation: NavigationTarget {
                conversation_id: None,
                project_id: Some(42),
                freelancer_id: Some(2),
            },
            ..EngineOptions::default()
        };
        let handle = start(&api, options);
        settle().await;

        let snapshot = handle.snapshot().await.expect("snapshot");
        let selected = snapshot.selected.expect("conversation should be selected");
        assert_eq!(selected.project_id, 42);
        assert_eq!(snapshot.conversations[0].id, selected.id);
        assert_eq!(snapshot.polling, Some(selected.id));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_list_is_published_before_first_fetch() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        let mut cache = ChatCache::open_in_memory().expect("cache");
        cache
            .replace_all(&[FakeApi::conversation(VIEWER, 9, 0)])
            .expect("seed cache");
        let handle = start(
            &api,
            EngineOptions {
                cache: Some(cache),
                ..EngineOptions::default()
            },
        );
        let mut events = handle.subscribe();
        settle().await;

        let lists: Vec<Vec<u64>> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::ConversationsUpdated(list) => {
                    Some(list.into_iter().map(|c| c.id).collect())
                }
                _ => None,
            })
            .collect();
        assert_eq!(lists, vec![vec![9], vec![7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_stops_when_handles_drop() {
        let api = Arc::new(FakeApi::with_conversations(VIEWER, &[(7, 0)]));
        let handle = start(&api, EngineOptions::default());
        let mut events = handle.subscribe();
        drop(handle);
        settle().await;
        loop {
            match events.recv().await {
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }
}
