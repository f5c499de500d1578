use ragdesk_transport::{ConversationId, ServerMessageId, StreamEventMapped, StreamTarget};

use crate::chat::message::{Message, MessageId};

/// Result of one `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Started(StreamTarget),
    Rejected(SendRejection),
    /// The request never reached the chat endpoint.
    ///
    /// `conversation_id` is `None` when conversation creation itself failed; the
    /// notice is then not stored anywhere and is handed back to the caller.
    Failed {
        conversation_id: Option<ConversationId>,
        error_message: Message,
    },
}

impl SendOutcome {
    pub fn target(&self) -> Option<&StreamTarget> {
        match self {
            Self::Started(target) => Some(target),
            Self::Rejected(_) | Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendRejection {
    BlankQuery,
    AlreadySending,
    /// Regenerate needs an assistant message with a user query before it.
    NothingToRegenerate,
}

/// Transient, non-blocking user notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    MessageDeleteFailed {
        conversation_id: ConversationId,
        message_id: ServerMessageId,
        reason: String,
    },
    ConversationDeleteFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    RegenerateUnavailable {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

impl Notification {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageDeleted { conversation_id, .. }
            | Self::MessageDeleteFailed { conversation_id, .. }
            | Self::ConversationDeleteFailed { conversation_id, .. }
            | Self::RegenerateUnavailable { conversation_id, .. } => conversation_id,
        }
    }
}

/// Items delivered to the controller inbox by background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Stream(StreamEventMapped),
    Notify(Notification),
}
