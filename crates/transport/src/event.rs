use serde::Deserialize;

use crate::ids::{ServerMessageId, StreamTarget};
use crate::sources::Source;

/// One decoded `data:` payload from the chat stream.
///
/// Every field is optional; a single event may carry several of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message_id: Option<ServerMessageId>,
    #[serde(default)]
    pub user_message_id: Option<ServerMessageId>,
}

impl StreamEvent {
    pub fn answer(fragment: impl Into<String>) -> Self {
        Self {
            answer: Some(fragment.into()),
            ..Self::default()
        }
    }

    pub fn sources(sources: Vec<Source>) -> Self {
        Self {
            sources: Some(sources),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn message_ids(
        message_id: Option<ServerMessageId>,
        user_message_id: Option<ServerMessageId>,
    ) -> Self {
        Self {
            message_id,
            user_message_id,
            ..Self::default()
        }
    }

    /// True when the event carries nothing the session cares about.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Transport payload delivered to the session layer.
///
/// `Event` is delivered in wire order, `Error` at most once and never for a
/// user cancellation, and `Complete` exactly once as the final item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Event(StreamEvent),
    Error(String),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn new(target: StreamTarget, payload: StreamEventPayload) -> Self {
        Self { target, payload }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, StreamEventPayload::Complete)
    }
}
