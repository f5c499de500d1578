use std::fmt;
use std::str::FromStr;

use ragdesk_transport::{
    ConversationId, HistoryMessage, HistoryRole, MessageUid, ServerMessageId, Source, StreamTarget,
};
use uuid::Uuid;

/// External reference key for one message.
///
/// Starts provisional and is replaced once the backend confirms a durable id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Provisional(MessageUid),
    Server(ServerMessageId),
}

impl MessageId {
    pub fn server_id(&self) -> Option<ServerMessageId> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Provisional(_) => None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(uid) => write!(formatter, "tmp-{uid}"),
            Self::Server(id) => write!(formatter, "{id}"),
        }
    }
}

/// Parses the `Display` form: a bare server id or `tmp-<uuid>`.
impl FromStr for MessageId {
    type Err = MessageIdParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some(uid) = raw.strip_prefix("tmp-") {
            return Uuid::parse_str(uid)
                .map(|uid| Self::Provisional(MessageUid(uid)))
                .map_err(|_| MessageIdParseError(raw.to_string()));
        }

        raw.parse::<ServerMessageId>()
            .map(Self::Server)
            .map_err(|_| MessageIdParseError(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIdParseError(pub String);

impl fmt::Display for MessageIdParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "`{}` is not a message id", self.0)
    }
}

impl std::error::Error for MessageIdParseError {}

impl From<ServerMessageId> for MessageId {
    fn from(value: ServerMessageId) -> Self {
        Self::Server(value)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl From<HistoryRole> for Role {
    fn from(value: HistoryRole) -> Self {
        match value {
            HistoryRole::User => Self::User,
            HistoryRole::Assistant => Self::Assistant,
        }
    }
}

/// One chat message.
///
/// `uid` is the rendering key and never changes; `id` is re-pointed when the
/// backend assigns a durable identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    uid: MessageUid,
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<Source>>,
}

impl Message {
    fn provisional(role: Role, content: impl Into<String>) -> Self {
        let uid = MessageUid::new_v7();
        Self {
            uid,
            id: MessageId::Provisional(uid),
            role,
            content: content.into(),
            sources: None,
        }
    }

    /// Optimistic user message appended before the request starts.
    pub fn user_provisional(content: impl Into<String>) -> Self {
        Self::provisional(Role::User, content)
    }

    /// Empty assistant message that receives streamed fragments.
    pub fn assistant_placeholder() -> Self {
        Self::provisional(Role::Assistant, String::new())
    }

    /// Assistant message carrying a standalone notice, outside any request.
    pub fn assistant_notice(content: impl Into<String>) -> Self {
        Self::provisional(Role::Assistant, content)
    }

    pub fn from_history(history: &HistoryMessage) -> Self {
        Self {
            uid: MessageUid::new_v7(),
            id: MessageId::Server(history.id),
            role: history.role.into(),
            content: history.content.clone(),
            sources: history.parsed_sources(),
        }
    }

    pub fn uid(&self) -> MessageUid {
        self.uid
    }
}

/// Conversation aggregate held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub messages: Vec<Message>,
    pub is_loading: bool,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            is_loading: false,
        }
    }

    pub fn position(&self, message_id: &MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| &message.id == message_id)
    }
}

/// Per-conversation request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Sending(StreamTarget),
}

/// State transition input for the request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTransition {
    Start(StreamTarget),
    Complete(StreamTarget),
    Fail(StreamTarget),
    Cancel(StreamTarget),
}

/// Rejection reason for illegal request transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTransitionRejection {
    AlreadySending {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveRequest,
    TargetMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

impl RequestTransition {
    pub fn target(&self) -> &StreamTarget {
        match self {
            Self::Start(target)
            | Self::Complete(target)
            | Self::Fail(target)
            | Self::Cancel(target) => target,
        }
    }
}

pub type RequestTransitionResult = Result<RequestState, RequestTransitionRejection>;

impl RequestState {
    pub fn active_target(&self) -> Option<&StreamTarget> {
        match self {
            Self::Sending(target) => Some(target),
            Self::Idle => None,
        }
    }

    pub fn is_sending(&self) -> bool {
        matches!(self, Self::Sending(_))
    }

    /// Returns true when an incoming event belongs to the live request.
    pub fn accepts(&self, target: &StreamTarget) -> bool {
        matches!(self, Self::Sending(active) if active == target)
    }

    /// Applies one transition.
    ///
    /// `Start` is only legal from `Idle`. Every terminal transition must name
    /// the live request exactly.
    pub fn apply(&self, transition: RequestTransition) -> RequestTransitionResult {
        match transition {
            RequestTransition::Start(target) => match self {
                Self::Idle => Ok(Self::Sending(target)),
                Self::Sending(active) => Err(RequestTransitionRejection::AlreadySending {
                    active: active.clone(),
                    attempted: target,
                }),
            },
            RequestTransition::Complete(target)
            | RequestTransition::Fail(target)
            | RequestTransition::Cancel(target) => self.apply_end(target),
        }
    }

    fn apply_end(&self, target: StreamTarget) -> RequestTransitionResult {
        match self {
            Self::Sending(active) if *active == target => Ok(Self::Idle),
            Self::Sending(active) => Err(RequestTransitionRejection::TargetMismatch {
                active: active.clone(),
                attempted: target,
            }),
            Self::Idle => Err(RequestTransitionRejection::NoActiveRequest),
        }
    }
}
