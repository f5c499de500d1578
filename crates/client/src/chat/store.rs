use std::collections::HashMap;

use ragdesk_transport::{ConversationId, StreamTarget};
use tokio_util::sync::CancellationToken;

use crate::chat::message::{
    Conversation, Message, MessageId, RequestState, RequestTransition, RequestTransitionRejection,
    Role,
};

/// Cancellation handle for the one in-flight request of a conversation.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub target: StreamTarget,
    cancel: CancellationToken,
}

impl PendingRequest {
    pub fn new(target: StreamTarget, cancel: CancellationToken) -> Self {
        Self { target, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Keyed table of conversations plus their pending request handles.
///
/// `begin_request` and `end_request` keep the loading flag and the pending
/// handle in agreement; the raw setters exist for hydration and tests.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
    pending_requests: HashMap<ConversationId, PendingRequest>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, id: &ConversationId) {
        self.entry(id);
    }

    fn entry(&mut self, id: &ConversationId) -> &mut Conversation {
        self.conversations
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(id.clone()))
    }

    /// Replaces the message list wholesale. The loading flag is kept.
    pub fn set_messages(&mut self, id: &ConversationId, messages: Vec<Message>) {
        self.entry(id).messages = messages;
    }

    pub fn add_message(&mut self, id: &ConversationId, message: Message) {
        self.entry(id).messages.push(message);
    }

    /// Applies `updater` to the message currently keyed by `message_id`.
    ///
    /// Missing conversations or messages are a no-op, so late stream updates
    /// never resurrect a deleted message.
    pub fn update_message<F>(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        updater: F,
    ) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(message) = self
            .conversations
            .get_mut(id)
            .and_then(|conversation| {
                conversation
                    .messages
                    .iter_mut()
                    .find(|message| &message.id == message_id)
            })
        else {
            return false;
        };

        updater(message);
        true
    }

    pub fn delete_message(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
    ) -> Option<Message> {
        let conversation = self.conversations.get_mut(id)?;
        let index = conversation.position(message_id)?;
        Some(conversation.messages.remove(index))
    }

    pub fn set_loading(&mut self, id: &ConversationId, is_loading: bool) {
        self.entry(id).is_loading = is_loading;
    }

    pub fn set_pending_request(&mut self, id: &ConversationId, request: Option<PendingRequest>) {
        match request {
            Some(request) => {
                self.pending_requests.insert(id.clone(), request);
            }
            None => {
                self.pending_requests.remove(id);
            }
        }
    }

    /// Moves the conversation into `Sending`, setting both halves of the
    /// in-flight state together.
    pub fn begin_request(
        &mut self,
        request: PendingRequest,
    ) -> Result<(), RequestTransitionRejection> {
        let id = request.target.conversation_id.clone();
        self.request_state(&id)
            .apply(RequestTransition::Start(request.target.clone()))?;

        self.set_loading(&id, true);
        self.set_pending_request(&id, Some(request));
        Ok(())
    }

    /// Returns the conversation to `Idle` if `transition` names the live request.
    pub fn end_request(
        &mut self,
        transition: RequestTransition,
    ) -> Result<PendingRequest, RequestTransitionRejection> {
        let id = transition.target().conversation_id.clone();
        self.request_state(&id).apply(transition)?;

        self.set_loading(&id, false);
        self.pending_requests
            .remove(&id)
            .ok_or(RequestTransitionRejection::NoActiveRequest)
    }

    /// Drops the conversation and cancels its outstanding request, if any.
    pub fn remove_conversation(&mut self, id: &ConversationId) -> Option<Conversation> {
        if let Some(request) = self.pending_requests.remove(id) {
            request.cancel();
        }
        self.conversations.remove(id)
    }

    pub fn is_loading(&self, id: &ConversationId) -> bool {
        self.conversations
            .get(id)
            .is_some_and(|conversation| conversation.is_loading)
    }

    pub fn pending_request(&self, id: &ConversationId) -> Option<&PendingRequest> {
        self.pending_requests.get(id)
    }

    pub fn request_state(&self, id: &ConversationId) -> RequestState {
        self.pending_requests
            .get(id)
            .map(|request| RequestState::Sending(request.target.clone()))
            .unwrap_or_default()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.conversations
            .get(id)
            .map(|conversation| conversation.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn find_message(&self, id: &ConversationId, message_id: &MessageId) -> Option<&Message> {
        self.messages(id)
            .iter()
            .find(|message| &message.id == message_id)
    }

    /// Nearest user message before `message_id`, i.e. the query it answers.
    pub fn preceding_user_query(
        &self,
        id: &ConversationId,
        message_id: &MessageId,
    ) -> Option<&Message> {
        let messages = self.messages(id);
        let index = messages.iter().position(|message| &message.id == message_id)?;
        messages[..index]
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
    }
}
