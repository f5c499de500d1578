use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ragdesk_transport::{
    ChatEventStream, ChatRequest, ChatStreamHandle, ChatTransport, ConversationApi, ConversationId,
    ConversationSummary, RequestId, ServerMessageId, StreamEvent, StreamEventMapped,
    StreamEventPayload, StreamTarget, TransportResult,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chat::events::{ControllerEvent, Notification, SendOutcome, SendRejection};
use crate::chat::message::{Message, MessageId, RequestTransition, Role};
use crate::chat::references::{RankedSources, rank_sources};
use crate::chat::store::{ConversationStore, PendingRequest};

pub const GENERIC_FAILURE_NOTICE: &str = "\n\n❌ Something went wrong, please try again.";
pub const STANDALONE_FAILURE_NOTICE: &str =
    "❌ Sorry, something went wrong. Please try again later.";

/// Upper bound on the server calls a user action waits for.
pub const DEFAULT_SERVER_CALL_TIMEOUT: Duration = Duration::from_secs(15);

const STREAM_CLOSED_EARLY: &str = "chat stream closed before completing";

pub fn inline_error_marker(error: &str) -> String {
    format!("\n\n❌ Error: {error}")
}

/// Bookkeeping for the live request of one conversation.
#[derive(Debug)]
struct ActiveStream {
    target: StreamTarget,
    /// Current id of the assistant message; re-pointed on `message_id`.
    assistant_id: MessageId,
    user_id: MessageId,
    reader: JoinHandle<()>,
}

/// The only component that starts chat requests.
///
/// Background tasks (stream readers, best-effort deletes) report through an
/// inbox; every store mutation happens on the task that owns the controller.
pub struct SessionController {
    store: ConversationStore,
    transport: Arc<dyn ChatTransport>,
    api: Arc<dyn ConversationApi>,
    inbox_tx: mpsc::UnboundedSender<ControllerEvent>,
    inbox_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    active_streams: HashMap<ConversationId, ActiveStream>,
    next_request_id: u64,
    notifications: Vec<Notification>,
    server_timeout: Duration,
}

impl SessionController {
    pub fn new(transport: Arc<dyn ChatTransport>, api: Arc<dyn ConversationApi>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            store: ConversationStore::new(),
            transport,
            api,
            inbox_tx,
            inbox_rx,
            active_streams: HashMap::new(),
            next_request_id: 1,
            notifications: Vec::new(),
            server_timeout: DEFAULT_SERVER_CALL_TIMEOUT,
        }
    }

    pub fn with_server_timeout(mut self, server_timeout: Duration) -> Self {
        self.server_timeout = server_timeout;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.store.messages(conversation_id)
    }

    pub fn is_loading(&self, conversation_id: &ConversationId) -> bool {
        self.store.is_loading(conversation_id)
    }

    /// Starts a chat request, creating the conversation first when `None`.
    pub async fn send(
        &mut self,
        conversation_id: Option<ConversationId>,
        query: &str,
    ) -> SendOutcome {
        if query.trim().is_empty() {
            return SendOutcome::Rejected(SendRejection::BlankQuery);
        }

        let conversation_id = match conversation_id {
            Some(conversation_id) => {
                if self.store.request_state(&conversation_id).is_sending()
                    || self.store.is_loading(&conversation_id)
                {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        "ignoring send while a request is outstanding"
                    );
                    return SendOutcome::Rejected(SendRejection::AlreadySending);
                }
                conversation_id
            }
            None => {
                let created = tokio::time::timeout(
                    self.server_timeout,
                    self.api.create_conversation(None),
                )
                .await;
                match created {
                    Ok(Ok(summary)) => {
                        tracing::info!(conversation_id = %summary.id, "created conversation");
                        summary.id
                    }
                    Ok(Err(error)) => {
                        tracing::error!(
                            stage = error.stage(),
                            error = %error,
                            "failed to create conversation"
                        );
                        return creation_failed();
                    }
                    Err(_) => {
                        tracing::error!(
                            timeout = ?self.server_timeout,
                            "timed out creating conversation"
                        );
                        return creation_failed();
                    }
                }
            }
        };

        self.store.init(&conversation_id);
        let user_message = Message::user_provisional(query);
        let assistant_message = Message::assistant_placeholder();
        let user_id = user_message.id;
        let assistant_id = assistant_message.id;
        self.store.add_message(&conversation_id, user_message);
        self.store.add_message(&conversation_id, assistant_message);

        let target = self.alloc_target(&conversation_id);
        let handle = match self
            .transport
            .stream_chat(ChatRequest::new(target.clone(), query))
        {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    stage = error.stage(),
                    error = %error,
                    "failed to start chat request"
                );
                self.store.update_message(&conversation_id, &assistant_id, |message| {
                    message.content.push_str(GENERIC_FAILURE_NOTICE);
                });
                let error_message = self
                    .store
                    .find_message(&conversation_id, &assistant_id)
                    .cloned()
                    .unwrap_or_else(|| Message::assistant_notice(STANDALONE_FAILURE_NOTICE));
                return SendOutcome::Failed {
                    conversation_id: Some(conversation_id),
                    error_message,
                };
            }
        };

        let ChatStreamHandle { stream, worker } = handle;
        let pending = PendingRequest::new(target.clone(), stream.cancel_token());
        if let Err(rejection) = self.store.begin_request(pending) {
            tracing::warn!(?rejection, target = ?target, "request start rejected");
            // Dropping the stream cancels the worker before it is ever polled.
            drop(stream);
            self.store.delete_message(&conversation_id, &assistant_id);
            self.store.delete_message(&conversation_id, &user_id);
            return SendOutcome::Rejected(SendRejection::AlreadySending);
        }

        tokio::spawn(worker);
        let reader = self.spawn_stream_reader(stream);
        self.active_streams.insert(
            conversation_id,
            ActiveStream {
                target: target.clone(),
                assistant_id,
                user_id,
                reader,
            },
        );

        SendOutcome::Started(target)
    }

    /// Cancels the outstanding request and returns to idle immediately.
    ///
    /// The transport's eventual completion is ignored as stale.
    pub fn stop(&mut self, conversation_id: &ConversationId) -> bool {
        let Some(target) = self
            .store
            .request_state(conversation_id)
            .active_target()
            .cloned()
        else {
            return false;
        };

        tracing::debug!(target = ?target, "stopping chat request");
        self.finalize_request(RequestTransition::Cancel(target))
    }

    /// Deletes an assistant answer and the query before it, then asks again.
    pub async fn regenerate(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> SendOutcome {
        if self.store.request_state(conversation_id).is_sending() {
            return SendOutcome::Rejected(SendRejection::AlreadySending);
        }

        let is_assistant = self
            .store
            .find_message(conversation_id, message_id)
            .is_some_and(|message| message.role == Role::Assistant);
        let query = self
            .store
            .preceding_user_query(conversation_id, message_id)
            .map(|message| (message.id, message.content.clone()));
        let (true, Some((user_id, query))) = (is_assistant, query) else {
            self.notifications.push(Notification::RegenerateUnavailable {
                conversation_id: conversation_id.clone(),
                message_id: *message_id,
            });
            return SendOutcome::Rejected(SendRejection::NothingToRegenerate);
        };

        let removed = [*message_id, user_id]
            .iter()
            .filter_map(|id| self.store.delete_message(conversation_id, id))
            .collect::<Vec<_>>();
        let api = &self.api;
        let server_deletes = async {
            for server_id in removed.iter().filter_map(|message| message.id.server_id()) {
                if let Err(error) = api.delete_message(conversation_id, server_id).await {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        message_id = %server_id,
                        error = %error,
                        "failed to delete regenerated message on server"
                    );
                }
            }
        };
        // Server deletion is best effort and never holds back the resend.
        if tokio::time::timeout(self.server_timeout, server_deletes)
            .await
            .is_err()
        {
            tracing::warn!(
                conversation_id = %conversation_id,
                timeout = ?self.server_timeout,
                "server deletes for regenerate timed out"
            );
        }

        self.send(Some(conversation_id.clone()), &query).await
    }

    /// Removes a message locally, then deletes it on the server in the
    /// background. Server failures become notifications; nothing is restored.
    pub fn delete_message(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> bool {
        let Some(removed) = self.store.delete_message(conversation_id, message_id) else {
            return false;
        };

        self.notifications.push(Notification::MessageDeleted {
            conversation_id: conversation_id.clone(),
            message_id: *message_id,
        });

        // Provisional ids were never seen by the server.
        if let Some(server_id) = removed.id.server_id() {
            self.spawn_server_message_delete(conversation_id.clone(), server_id);
        }
        true
    }

    pub fn delete_conversation(&mut self, conversation_id: &ConversationId) {
        if let Some(active) = self.active_streams.remove(conversation_id) {
            active.reader.abort();
        }
        self.store.remove_conversation(conversation_id);

        let api = Arc::clone(&self.api);
        let inbox = self.inbox_tx.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move {
            if let Err(error) = api.delete_conversation(&conversation_id).await {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to delete conversation on server"
                );
                let _ = inbox.send(ControllerEvent::Notify(Notification::ConversationDeleteFailed {
                    conversation_id,
                    reason: error.to_string(),
                }));
            }
        });
    }

    /// Replaces local messages with the server history.
    ///
    /// Skipped while a request is streaming so history never clobbers it.
    pub async fn load_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> TransportResult<()> {
        if self.store.is_loading(conversation_id) {
            tracing::debug!(
                conversation_id = %conversation_id,
                "skipping history load while sending"
            );
            return Ok(());
        }

        let detail = self.api.get_conversation(conversation_id).await?;
        let messages = detail
            .messages
            .iter()
            .map(Message::from_history)
            .collect::<Vec<_>>();

        // A send may have started while the fetch was in flight.
        if self.store.is_loading(conversation_id) {
            return Ok(());
        }
        self.store.set_messages(conversation_id, messages);
        Ok(())
    }

    pub async fn list_conversations(&self) -> TransportResult<Vec<ConversationSummary>> {
        self.api.list_conversations().await
    }

    /// Applies one transport event. Returns false when it was stale.
    pub fn handle_stream_event(&mut self, event: StreamEventMapped) -> bool {
        if !self.stream_event_is_current(&event.target) {
            tracing::debug!(target = ?event.target, "dropping stale stream event");
            return false;
        }

        let StreamEventMapped { target, payload } = event;
        match payload {
            StreamEventPayload::Event(event) => self.apply_stream_event(&target, event),
            StreamEventPayload::Error(message) => {
                tracing::warn!(target = ?target, error = %message, "chat request failed");
                if let Some(active) = self.active_streams.get(&target.conversation_id) {
                    self.store
                        .update_message(&target.conversation_id, &active.assistant_id, |message| {
                            message.content.push_str(GENERIC_FAILURE_NOTICE);
                        });
                }
                self.finalize_request(RequestTransition::Fail(target));
            }
            StreamEventPayload::Complete => {
                self.finalize_request(RequestTransition::Complete(target));
            }
        }
        true
    }

    /// Waits for the next background event and applies it.
    ///
    /// Returns the conversation it touched.
    pub async fn next_update(&mut self) -> Option<ConversationId> {
        let event = self.inbox_rx.recv().await?;
        Some(self.apply_controller_event(event))
    }

    /// Applies every already-queued background event without waiting.
    pub fn drain_ready(&mut self) -> Vec<ConversationId> {
        let mut touched = Vec::new();
        while let Ok(event) = self.inbox_rx.try_recv() {
            let conversation_id = self.apply_controller_event(event);
            if !touched.contains(&conversation_id) {
                touched.push(conversation_id);
            }
        }
        touched
    }

    pub async fn wait_until_idle(&mut self, conversation_id: &ConversationId) {
        while self.store.is_loading(conversation_id) {
            if self.next_update().await.is_none() {
                break;
            }
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Sources of `message_id`, ranked against the query it answered.
    pub fn references(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Option<RankedSources> {
        let sources = self
            .store
            .find_message(conversation_id, message_id)?
            .sources
            .as_deref()?;
        let query = self
            .store
            .preceding_user_query(conversation_id, message_id)
            .map(|message| message.content.as_str())
            .unwrap_or_default();

        Some(rank_sources(sources, query))
    }

    fn apply_controller_event(&mut self, event: ControllerEvent) -> ConversationId {
        match event {
            ControllerEvent::Stream(event) => {
                let conversation_id = event.target.conversation_id.clone();
                self.handle_stream_event(event);
                conversation_id
            }
            ControllerEvent::Notify(notification) => {
                let conversation_id = notification.conversation_id().clone();
                self.notifications.push(notification);
                conversation_id
            }
        }
    }

    fn apply_stream_event(&mut self, target: &StreamTarget, event: StreamEvent) {
        let conversation_id = &target.conversation_id;
        let Some(active) = self.active_streams.get_mut(conversation_id) else {
            return;
        };

        let StreamEvent {
            answer,
            sources,
            error,
            message_id,
            user_message_id,
        } = event;

        if let Some(error) = error {
            self.store
                .update_message(conversation_id, &active.assistant_id, |message| {
                    message.content.push_str(&inline_error_marker(&error));
                });
        }

        if let Some(answer) = answer {
            self.store
                .update_message(conversation_id, &active.assistant_id, |message| {
                    message.content.push_str(&answer);
                });
        }

        if let Some(sources) = sources {
            self.store
                .update_message(conversation_id, &active.assistant_id, |message| {
                    message.sources = Some(sources);
                });
        }

        if let Some(server_id) = message_id {
            active.assistant_id = rename_message(
                &mut self.store,
                conversation_id,
                active.assistant_id,
                server_id,
            );
        }

        if let Some(server_id) = user_message_id {
            active.user_id =
                rename_message(&mut self.store, conversation_id, active.user_id, server_id);
        }
    }

    fn finalize_request(&mut self, transition: RequestTransition) -> bool {
        let target = transition.target().clone();
        let pending = match self.store.end_request(transition) {
            Ok(pending) => pending,
            Err(rejection) => {
                tracing::debug!(?rejection, target = ?target, "ignoring request transition");
                return false;
            }
        };
        pending.cancel();

        if let Some(active) = self.active_streams.remove(&target.conversation_id) {
            active.reader.abort();
            self.prune_empty_placeholder(&target.conversation_id, &active.assistant_id);
        }
        true
    }

    fn prune_empty_placeholder(
        &mut self,
        conversation_id: &ConversationId,
        assistant_id: &MessageId,
    ) {
        let is_empty = self
            .store
            .find_message(conversation_id, assistant_id)
            .is_some_and(|message| message.role == Role::Assistant && message.content.is_empty());
        if is_empty {
            self.store.delete_message(conversation_id, assistant_id);
        }
    }

    fn stream_event_is_current(&self, target: &StreamTarget) -> bool {
        self.active_streams
            .get(&target.conversation_id)
            .is_some_and(|active| active.target == *target)
            && self
                .store
                .request_state(&target.conversation_id)
                .accepts(target)
    }

    fn spawn_stream_reader(&self, mut stream: ChatEventStream) -> JoinHandle<()> {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let terminal = event.is_terminal();
                if inbox.send(ControllerEvent::Stream(event)).is_err() || terminal {
                    return;
                }
            }

            // Channel closed without a terminal payload: every request still ends.
            let target = stream.target().clone();
            tracing::warn!(target = ?target, "chat stream closed without completing");
            let payloads = [
                StreamEventPayload::Error(STREAM_CLOSED_EARLY.to_string()),
                StreamEventPayload::Complete,
            ];
            for payload in payloads {
                let event = StreamEventMapped::new(target.clone(), payload);
                if inbox.send(ControllerEvent::Stream(event)).is_err() {
                    return;
                }
            }
        })
    }

    fn spawn_server_message_delete(
        &self,
        conversation_id: ConversationId,
        message_id: ServerMessageId,
    ) {
        let api = Arc::clone(&self.api);
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            if let Err(error) = api.delete_message(&conversation_id, message_id).await {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    error = %error,
                    "failed to delete message on server"
                );
                let _ = inbox.send(ControllerEvent::Notify(Notification::MessageDeleteFailed {
                    conversation_id,
                    message_id,
                    reason: error.to_string(),
                }));
            }
        });
    }

    fn alloc_target(&mut self, conversation_id: &ConversationId) -> StreamTarget {
        let request_id = RequestId::new(self.next_request_id);
        self.next_request_id = self.next_request_id.saturating_add(1);
        StreamTarget::new(conversation_id.clone(), request_id)
    }
}

fn creation_failed() -> SendOutcome {
    SendOutcome::Failed {
        conversation_id: None,
        error_message: Message::assistant_notice(STANDALONE_FAILURE_NOTICE),
    }
}

/// Re-points `current` to the server id and returns the id to track from now on.
fn rename_message(
    store: &mut ConversationStore,
    conversation_id: &ConversationId,
    current: MessageId,
    server_id: ServerMessageId,
) -> MessageId {
    let renamed = MessageId::Server(server_id);
    store.update_message(conversation_id, &current, |message| message.id = renamed);
    renamed
}
